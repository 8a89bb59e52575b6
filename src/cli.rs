//! Command-line surface: thread/task/cache/knowledge administration
//! commands for operating the agent core out-of-band from the worker
//! process.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sre-agent", about = "Redis SRE agent core — thread/task administration CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Operate on conversation threads.
    Thread {
        #[command(subcommand)]
        action: ThreadAction,
    },
    /// Operate on per-turn tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Inspect or clear the tool result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Query ingested knowledge chunks.
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },
}

#[derive(Subcommand)]
pub enum ThreadAction {
    List {
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        json: bool,
    },
    Sources {
        thread_id: String,
        #[arg(long)]
        json: bool,
    },
    Delete {
        thread_id: String,
    },
}

#[derive(Subcommand)]
pub enum TaskAction {
    List {
        thread_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Get {
        task_id: String,
        thread_id: String,
        #[arg(long)]
        json: bool,
    },
    Delete {
        task_id: String,
        thread_id: String,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    Clear {
        #[arg(long)]
        instance: Option<String>,
        #[arg(long)]
        all: bool,
    },
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum KnowledgeAction {
    Fragments {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    Related {
        #[arg(long = "document-hash")]
        document_hash: String,
        #[arg(long = "chunk-index")]
        chunk_index: u32,
        #[arg(long, default_value_t = 2)]
        window: u32,
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    #[test]
    fn parses_thread_list_with_defaults() {
        let cli = Cli::parse_from(["sre-agent", "thread", "list"]);
        match cli.command {
            Command::Thread { action: ThreadAction::List { limit, offset, json, .. } } => {
                assert_eq!(limit, 20);
                assert_eq!(offset, 0);
                assert!(!json);
            }
            _ => panic!("expected Thread::List"),
        }
    }

    #[test]
    fn parses_knowledge_related_window() {
        let cli = Cli::parse_from([
            "sre-agent",
            "knowledge",
            "related",
            "--document-hash",
            "abc123",
            "--chunk-index",
            "4",
            "--window",
            "1",
        ]);
        match cli.command {
            Command::Knowledge { action: KnowledgeAction::Related { document_hash, chunk_index, window, .. } } => {
                assert_eq!(document_hash, "abc123");
                assert_eq!(chunk_index, 4);
                assert_eq!(window, 1);
            }
            _ => panic!("expected Knowledge::Related"),
        }
    }

    #[test]
    fn parses_cache_clear_all_flag() {
        let cli = Cli::parse_from(["sre-agent", "cache", "clear", "--all"]);
        match cli.command {
            Command::Cache { action: CacheAction::Clear { all, instance } } => {
                assert!(all);
                assert!(instance.is_none());
            }
            _ => panic!("expected Cache::Clear"),
        }
    }
}
