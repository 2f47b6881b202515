//! Static broadcast policies
//!
//! Which commands go to every primary, and how their per-node replies are folded
//! into one. The table is explicit per command; a command that is not listed runs
//! on a single node chosen by its routing key.

use crate::arguments::CommandArguments;

/// Where a command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    /// One node: the owner of the routing key, or any node for keyless commands
    SingleNode,
    /// Every primary
    AllPrimaries,
}

/// How per-node replies are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePolicy {
    /// The first successful reply, in node order
    OneSucceeded,
    /// Every node must succeed with the same reply, which is returned
    AllSucceeded,
    /// Logical AND of integer or boolean replies, element-wise for arrays
    LogicalAnd,
    /// Logical OR of integer or boolean replies, element-wise for arrays
    LogicalOr,
    /// Sum of numeric replies
    Sum,
    /// Smallest numeric reply
    Min,
    /// Largest numeric reply
    Max,
    /// Concatenation of array replies in node order
    CombineArrays,
}

/// Whether failed nodes fail the whole broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTolerance {
    /// Any failed node fails the call
    FailFast,
    /// Failed nodes are reported but the call succeeds while at least one node did
    BestEffort,
}

/// Complete dispatch policy of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPolicy {
    /// Where the command runs
    pub request: RequestPolicy,
    /// How replies combine when it runs on several nodes
    pub response: ResponsePolicy,
    /// How node failures are treated
    pub tolerance: FailureTolerance,
}

impl CommandPolicy {
    /// Run on one node
    pub const SINGLE_NODE: Self = Self {
        request: RequestPolicy::SingleNode,
        response: ResponsePolicy::OneSucceeded,
        tolerance: FailureTolerance::FailFast,
    };

    /// Run on every primary, failing fast
    pub const fn all_primaries(response: ResponsePolicy) -> Self {
        Self {
            request: RequestPolicy::AllPrimaries,
            response,
            tolerance: FailureTolerance::FailFast,
        }
    }

    /// Same policy with a different tolerance
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: FailureTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Whether the command fans out
    pub fn is_broadcast(&self) -> bool {
        self.request == RequestPolicy::AllPrimaries
    }
}

/// Look up the policy of a command
pub fn policy_for(args: &CommandArguments) -> CommandPolicy {
    use ResponsePolicy::*;

    let subcommand = args
        .subcommand()
        .map(|s| String::from_utf8_lossy(s).to_ascii_uppercase());

    match (args.name(), subcommand.as_deref()) {
        ("DBSIZE", _) => CommandPolicy::all_primaries(Sum),
        ("WAIT", _) => CommandPolicy::all_primaries(Min),
        ("KEYS", _) => CommandPolicy::all_primaries(CombineArrays),
        ("FLUSHALL" | "FLUSHDB" | "PING", _) => CommandPolicy::all_primaries(AllSucceeded),
        ("RANDOMKEY", _) => {
            CommandPolicy::all_primaries(OneSucceeded).with_tolerance(FailureTolerance::BestEffort)
        }

        ("SCRIPT", Some("EXISTS")) => CommandPolicy::all_primaries(LogicalAnd),
        ("SCRIPT", Some("FLUSH" | "LOAD")) => CommandPolicy::all_primaries(AllSucceeded),
        ("SCRIPT" | "FUNCTION", Some("KILL")) => {
            CommandPolicy::all_primaries(OneSucceeded).with_tolerance(FailureTolerance::BestEffort)
        }
        ("FUNCTION", Some("FLUSH" | "DELETE" | "LOAD" | "RESTORE")) => {
            CommandPolicy::all_primaries(AllSucceeded)
        }
        ("CONFIG", Some("SET" | "RESETSTAT" | "REWRITE")) => {
            CommandPolicy::all_primaries(AllSucceeded)
        }

        _ => CommandPolicy::SINGLE_NODE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_commands_are_single_node() {
        let policy = policy_for(&CommandArguments::new("GET").key("k"));
        assert_eq!(policy, CommandPolicy::SINGLE_NODE);
        assert!(!policy.is_broadcast());
    }

    #[test]
    fn test_global_commands() {
        let dbsize = policy_for(&CommandArguments::new("dbsize"));
        assert_eq!(dbsize.request, RequestPolicy::AllPrimaries);
        assert_eq!(dbsize.response, ResponsePolicy::Sum);

        let flush = policy_for(&CommandArguments::new("FLUSHALL").arg("ASYNC"));
        assert_eq!(flush.response, ResponsePolicy::AllSucceeded);
        assert_eq!(flush.tolerance, FailureTolerance::FailFast);

        let random = policy_for(&CommandArguments::new("RANDOMKEY"));
        assert_eq!(random.tolerance, FailureTolerance::BestEffort);
    }

    #[test]
    fn test_subcommands_are_distinguished() {
        let exists = policy_for(&CommandArguments::new("SCRIPT").arg("exists").arg("abc"));
        assert_eq!(exists.response, ResponsePolicy::LogicalAnd);

        let load = policy_for(&CommandArguments::new("SCRIPT").arg("LOAD").arg("return 1"));
        assert_eq!(load.response, ResponsePolicy::AllSucceeded);

        let get = policy_for(&CommandArguments::new("CONFIG").arg("GET").arg("maxmemory"));
        assert!(!get.is_broadcast());
    }
}
