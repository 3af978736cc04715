//! Stages - 다섯 단계 구현
//!
//! ```text
//! Interpret --classify--> Classify --{shell|coding|integrated}--> SelectTools
//!   --execute--> RefreshContext --default--> ComposeResponse --complete--> (끝)
//! ```

mod classify;
mod compose;
mod interpret;
mod refresh;
mod select;

pub use classify::{classify, ClassifyStage};
pub use compose::ComposeStage;
pub use interpret::InterpretStage;
pub use refresh::RefreshStage;
pub use select::SelectToolsStage;
