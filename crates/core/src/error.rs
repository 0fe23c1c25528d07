use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid day '{input}': expected YYYY-MM-DD ({source})")]
    InvalidDay {
        input: String,
        source: chrono::ParseError,
    },

    #[error("Day out of range: {0}")]
    DayOutOfRange(String),
}
