use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Approvals: multi-step approval workflows for maintenance requests
#[derive(Parser)]
#[command(name = "approvals", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to APPROVALS_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Keep everything in process memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },

    /// Inspect workflow definitions
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Inspect and maintain approval records
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Read the approval audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// List non-archived workflows
    List,
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List pending approval records
    List,
    /// Expire overdue tokens and update request stages now
    Sweep,
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// List audit entries of one request, oldest first
    List {
        #[arg(long)]
        request_id: Uuid,
    },
}
