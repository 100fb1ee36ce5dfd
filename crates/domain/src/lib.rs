//! 消息守卫核心领域模型
//!
//! 包含用户与房间标识、限流判定与消息校验结果等值对象。

pub mod errors;
pub mod rate_limit;
pub mod validation;
pub mod value_objects;

pub use errors::*;
pub use rate_limit::*;
pub use validation::*;
pub use value_objects::*;
