//! Task tracker errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaskError>;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No active plan")]
    NoActivePlan,

    #[error("Plan {0} is closed")]
    PlanClosed(String),

    #[error("Plan not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl TaskError {
    pub fn index_out_of_range(what: &str, index: usize, len: usize) -> Self {
        TaskError::Validation(format!("{} index {} out of range (len {})", what, index, len))
    }
}

impl From<TaskError> for pocket_foundation::Error {
    fn from(err: TaskError) -> Self {
        use pocket_foundation::Error;
        match err {
            TaskError::Validation(msg) => Error::Validation(msg),
            TaskError::NoActivePlan => Error::NotFound("active plan".to_string()),
            TaskError::PlanClosed(id) => Error::Validation(format!("plan {} is closed", id)),
            TaskError::NotFound(id) => Error::NotFound(format!("plan {}", id)),
            TaskError::Persistence(msg) => Error::Persistence(msg),
        }
    }
}
