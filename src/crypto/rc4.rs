use std::fmt;

use zeroize::Zeroize;

/// RC4 stream cipher. The keystream continues across `process` calls, so one instance serves
/// one direction for the whole life of a security context.
#[derive(Clone)]
pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (index, value) in s.iter_mut().enumerate() {
            *value = index as u8;
        }

        if !key.is_empty() {
            let mut j = 0u8;
            for i in 0..256 {
                j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
                s.swap(i, usize::from(j));
            }
        }

        Self { s, i: 0, j: 0 }
    }

    pub fn process(&mut self, message: &[u8]) -> Vec<u8> {
        message
            .iter()
            .map(|byte| {
                self.i = self.i.wrapping_add(1);
                self.j = self.j.wrapping_add(self.s[usize::from(self.i)]);
                self.s.swap(usize::from(self.i), usize::from(self.j));
                let index = self.s[usize::from(self.i)].wrapping_add(self.s[usize::from(self.j)]);

                byte ^ self.s[usize::from(index)]
            })
            .collect()
    }
}

impl Drop for Rc4 {
    fn drop(&mut self) {
        self.s.zeroize();
        self.i.zeroize();
        self.j.zeroize();
    }
}

impl fmt::Debug for Rc4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rc4").finish_non_exhaustive()
    }
}
