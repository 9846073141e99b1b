/// Interactive front end
///
/// This module handles:
/// - Prompt abstraction and the terminal implementation (prompt.rs)
/// - Text tables for summaries and reports (view.rs)
/// - The main menu loop and its commands (commands.rs)

pub mod commands;
pub mod prompt;
pub mod view;
