//! Command implementation modules

pub mod executions;
pub mod run;
pub mod workflows;

pub use executions::{
    run_cancel_command, run_cleanup_command, run_list_command, run_show_command,
};
pub use run::{run_resume_command, run_start_command, run_workflow_command};
pub use workflows::run_workflows_command;
