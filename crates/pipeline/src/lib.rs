//! Comic strip orchestration.
//!
//! Ties the text service, the script parser and the image engine together:
//! [`writer`] produces a script, [`panel`] renders one panel, and
//! [`assembler`] renders a whole strip while absorbing per-panel failures.

pub mod assembler;
pub mod panel;
pub mod writer;

#[cfg(test)]
mod testing;
