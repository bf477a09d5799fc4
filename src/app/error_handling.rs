//! Error handling utilities

use tracing::error;

/// Report a fatal error and exit with its status code
///
/// `DurableError`s print their user message (plus the source chain with
/// `-v`); anything else prints its display form and exits with 1.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    use crate::error::DurableError;

    error!("Fatal error: {:#}", error);

    let durable = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<DurableError>());
    let exit_code = if let Some(durable) = durable {
        eprintln!("{}", durable.user_message());
        if verbose >= 1 {
            eprintln!("\nContext Chain:\n{}", durable.developer_message());
        }
        durable.exit_code()
    } else {
        eprintln!("Error: {error}");
        if verbose >= 1 {
            eprintln!("\nError chain:");
            for (i, cause) in error.chain().enumerate() {
                eprintln!("  {}: {}", i, cause);
            }
        }
        1
    };

    std::process::exit(exit_code)
}
