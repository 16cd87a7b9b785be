use clap::{Args, Parser, Subcommand};

/// workflow-sync — transition requests and approval queue from the terminal
#[derive(Parser)]
#[command(name = "workflow-sync", version, about)]
pub struct Cli {
    /// Override WORKFLOW_API_URL
    #[arg(long, global = true, env = "WORKFLOW_API_URL")]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone)]
pub struct ScopeArgs {
    /// Approver role (e.g. MANAGER)
    #[arg(long, conflicts_with = "manager")]
    pub role: Option<String>,
    /// Manager id
    #[arg(long)]
    pub manager: Option<i64>,
    /// Queue status to query
    #[arg(long, default_value = "PENDING")]
    pub status: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the approval queue
    Pending {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Free-text filter over names and emails
        #[arg(short, long, default_value = "")]
        query: String,
        /// pending | approved | rejected | all
        #[arg(long, default_value = "all")]
        filter: String,
    },

    /// Request a workflow transition for an entity
    Request {
        entity_type: String,
        entity_id: String,
        /// Target state (defaults to IN_REVIEW)
        #[arg(long = "to")]
        to_state: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },

    /// Approve a pending request
    Approve { request_id: String },

    /// Reject a pending request
    Reject {
        request_id: String,
        #[arg(long)]
        reason: String,
    },

    /// Escalate a pending request
    Escalate {
        request_id: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Approve every pending request in scope
    ApproveAll {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Show the audit timeline of an entity
    History { entity_type: String, entity_id: String },

    /// Keep the queue in sync over the realtime channel until Ctrl-C
    Watch {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_reject() {
        let cli = Cli::try_parse_from(["workflow-sync", "reject", "12", "--reason", "Missing attachment"]).unwrap();
        match cli.command {
            Commands::Reject { request_id, reason } => {
                assert_eq!(request_id, "12");
                assert_eq!(reason, "Missing attachment");
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_role_and_manager_conflict() {
        let res = Cli::try_parse_from(["workflow-sync", "pending", "--role", "LEAD", "--manager", "4"]);
        assert!(res.is_err());
    }
}
