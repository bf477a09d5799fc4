//! List built-in workflows

use anyhow::Result;

use crate::workflows;

pub fn run_workflows_command() -> Result<()> {
    println!("Built-in workflows:");
    for (name, description) in workflows::describe() {
        println!("  {:<12} {}", name, description);
    }
    Ok(())
}
