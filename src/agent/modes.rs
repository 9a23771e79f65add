#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerMode {
    #[default]
    Standard,
    DeepThink,
}

impl AnswerMode {
    pub fn from_flag(deep_think: bool) -> Self {
        if deep_think {
            AnswerMode::DeepThink
        } else {
            AnswerMode::Standard
        }
    }
}
