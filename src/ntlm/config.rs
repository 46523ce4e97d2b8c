use crate::ntlm::{DEFAULT_NTLM_VERSION, NTLM_VERSION_SIZE};

/// NTLM context settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NtlmConfig {
    /// Sent in the AUTHENTICATE message; the responder uses it as its computer name.
    pub workstation: Option<String>,
    /// NTLMv2 mode: version block, MIC and AV pair processing. Turning it off falls back to the legacy layout.
    pub ntlm_v2: bool,
    /// The `VERSION` structure written when the version flag is negotiated.
    pub version: [u8; NTLM_VERSION_SIZE],
    /// Adds the `Single_Host_Data` restrictions pair to the target info of the NTLMv2 response.
    pub send_single_host_data: bool,
}

impl NtlmConfig {
    pub fn new(workstation: String) -> Self {
        Self {
            workstation: Some(workstation),
            ..Default::default()
        }
    }
}

impl Default for NtlmConfig {
    fn default() -> Self {
        Self {
            workstation: None,
            ntlm_v2: true,
            version: DEFAULT_NTLM_VERSION,
            send_single_host_data: true,
        }
    }
}
