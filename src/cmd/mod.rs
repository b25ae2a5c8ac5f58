//! CLI command implementations.
//!
//! | Module     | Commands handled                        |
//! |------------|-------------------------------------------|
//! | `validate` | `Validate`                                |
//! | `run`      | `Run`                                     |
//! | `nebula`   | `Nebula { Plan, Apply, Show, Status }`    |
//! | `cockpit`  | `Cockpit`                                 |

pub mod cockpit;
pub mod nebula;
pub mod run;
pub mod validate;

pub use cockpit::cmd_cockpit;
pub use nebula::{cmd_nebula_apply, cmd_nebula_plan, cmd_nebula_show, cmd_nebula_status};
pub use run::cmd_run;
pub use validate::cmd_validate;
