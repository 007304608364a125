mod engine;
mod error;
mod types;

pub use engine::HookEngine;
pub use error::{HookError, Result};
pub use types::{
    HookAction, HookContext, HookDefinition, HookEvent, HookHandler, HookResult, HookTiming,
};
