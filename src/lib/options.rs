/// How the exit statuses of the individual commands reduce to one status for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusPolicy {
    /// Every command must exit with zero. The first failing command, in pipeline order,
    /// decides the status of the pipeline.
    AllZero,
    /// Only the last command's status counts, as in a shell without `pipefail`.
    Last,
}

impl Default for StatusPolicy {
    fn default() -> Self { StatusPolicy::AllZero }
}

/// Options for the pipeline executor
#[derive(Debug, Clone, Hash)]
pub struct Options {
    /// The token that separates one command from the next.
    pub delimiter: String,
    /// Which commands decide the pipeline's status.
    pub policy: StatusPolicy,
    /// Print the pipeline to stderr before executing it.
    pub print_comms: bool,
}

impl Options {
    pub const DEFAULT_DELIMITER: &'static str = "|";
}

impl Default for Options {
    fn default() -> Self {
        Options {
            delimiter:   Options::DEFAULT_DELIMITER.into(),
            policy:      StatusPolicy::default(),
            print_comms: false,
        }
    }
}
