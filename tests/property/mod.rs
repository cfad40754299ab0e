//! Property test modules.

mod retry;
