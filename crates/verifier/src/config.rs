#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationLevel {
    Fast,
    Standard,
    Full,
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub level: VerificationLevel,
    pub max_diagnostics: usize,
    /// Accept code after an unconditional transfer that no frame describes.
    pub allow_dead_code: bool,
    pub check_nesting: bool,
    pub check_limits: bool,
    pub check_frames: bool,
}

impl VerifierConfig {
    pub fn for_level(level: VerificationLevel) -> Self {
        match level {
            VerificationLevel::Fast => Self {
                level,
                max_diagnostics: 200,
                allow_dead_code: true,
                check_nesting: false,
                check_limits: false,
                check_frames: false,
            },
            VerificationLevel::Standard => Self {
                level,
                max_diagnostics: 200,
                allow_dead_code: true,
                check_nesting: true,
                check_limits: true,
                check_frames: false,
            },
            VerificationLevel::Full => Self {
                level,
                max_diagnostics: 500,
                allow_dead_code: false,
                check_nesting: true,
                check_limits: true,
                check_frames: true,
            },
        }
    }

    pub fn should_check_nesting(&self) -> bool {
        self.check_nesting || matches!(self.level, VerificationLevel::Full)
    }

    pub fn should_check_limits(&self) -> bool {
        self.check_limits || matches!(self.level, VerificationLevel::Full)
    }

    pub fn should_check_frames(&self) -> bool {
        self.check_frames || matches!(self.level, VerificationLevel::Full)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::for_level(VerificationLevel::Standard)
    }
}
