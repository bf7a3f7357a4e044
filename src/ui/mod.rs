//! Terminal output helpers for the CLI
//!
//! Interactive terminals get glyphs and color; pipes and CI get plain
//! bracketed markers that are stable to grep.

mod context;
mod output;

pub use context::UiContext;
pub use output::{
    intro, key_value, remark, step_error_detail, step_ok, step_ok_detail, step_warn_hint,
};
