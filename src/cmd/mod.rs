//! CLI command implementations.
//!
//! | Module     | Commands handled                    |
//! |------------|-------------------------------------|
//! | `run`      | `Run`                               |
//! | `sessions` | `Sessions list/show/delete/cleanup` |
//! | `policies` | `Policies`                          |

pub mod policies;
pub mod run;
pub mod sessions;

pub use policies::cmd_policies;
pub use run::cmd_run;
pub use sessions::cmd_sessions;
