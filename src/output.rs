/// Where command handlers write what the user sees.
pub trait UserOutput: Send + Sync {
    /// Progress notes such as "Stopping and removing project app..."
    fn status(&self, message: &str);

    fn warning(&self, message: &str);

    /// Command results, e.g. one row of `ps`.
    fn line(&self, message: &str);
}

/// Progress and warnings on stderr, results on stdout.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33mWARNING: {}\x1b[0m", message);
    }

    fn line(&self, message: &str) {
        println!("{}", message);
    }
}
