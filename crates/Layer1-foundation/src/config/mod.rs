//! Config - 통합 설정 관리
//!
//! - `pocket.rs` - PocketConfig 통합 설정 (셸, 프로세스, 컨텍스트, 보안)

mod pocket;

pub use pocket::{
    AgentSettings, ContextSettings, PocketConfig, ProcessSettings, SecuritySettings,
    ShellSettings, StorageSettings, POCKET_CONFIG_FILE,
};
