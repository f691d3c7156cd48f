/// Engine subcommands and the flags each one always carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Backup,
    Snapshots,
    Ls,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Init => "init",
            Operation::Backup => "backup",
            Operation::Snapshots => "snapshots",
            Operation::Ls => "ls",
        }
    }

    pub fn fixed_flags(&self) -> &'static [&'static str] {
        match self {
            Operation::Backup => &["--json", "--exclude-caches"],
            Operation::Init | Operation::Snapshots | Operation::Ls => &["--json"],
        }
    }
}

/// Ordered argument vector for one invocation: operation name, fixed
/// flags, then whatever the caller appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(operation: Operation) -> Self {
        let mut args = Vec::with_capacity(8);
        args.push(operation.name().to_string());
        args.extend(operation.fixed_flags().iter().map(|f| f.to_string()));
        Self { args }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends `flag value` once per value, in input order.
    pub fn repeated<I, S>(mut self, flag: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self.args.push(flag.to_string());
            self.args.push(value.into());
        }
        self
    }

    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    pub fn into_vec(self) -> Vec<String> {
        self.args
    }
}
