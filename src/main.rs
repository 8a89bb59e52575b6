//! Binary entry point: administration CLI over the thread/task/cache/
//! knowledge stores.

use clap::Parser;
use sre_agent_core::cli::{CacheAction, Cli, Command, KnowledgeAction, TaskAction, ThreadAction};
use sre_agent_core::config::Config;
use sre_agent_core::knowledge::KnowledgeStore;
use sre_agent_core::task_store::TaskStore;
use sre_agent_core::thread_store::ThreadStore;
use sre_agent_core::tools::ToolManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let client = redis::Client::open(config.redis_url.as_str())?;
    let redis = redis::aio::ConnectionManager::new(client).await?;

    let cli = Cli::parse();

    match cli.command {
        Command::Thread { action } => handle_thread(action, redis).await,
        Command::Task { action } => handle_task(action, redis).await,
        Command::Cache { action } => handle_cache(action, redis).await,
        Command::Knowledge { action } => handle_knowledge(action, redis).await,
    }
}

async fn handle_thread(action: ThreadAction, redis: redis::aio::ConnectionManager) -> anyhow::Result<()> {
    let store = ThreadStore::new(redis);
    match action {
        ThreadAction::List { user_id, limit, offset, json } => {
            let threads = store.list(user_id.as_deref(), limit, offset).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&threads)?);
            } else {
                for t in &threads {
                    println!("{}  {}  {}", t.thread_id, t.subject, t.updated_at);
                }
            }
        }
        ThreadAction::Sources { thread_id, json } => {
            let thread = store.get(&thread_id).await?;
            match thread {
                Some(t) if json => println!("{}", serde_json::to_string_pretty(&t)?),
                Some(t) => println!("{:#?}", t.context),
                None => println!("thread {thread_id} not found"),
            }
        }
        ThreadAction::Delete { thread_id } => {
            store.delete(&thread_id).await?;
            println!("deleted thread {thread_id}");
        }
    }
    Ok(())
}

async fn handle_task(action: TaskAction, redis: redis::aio::ConnectionManager) -> anyhow::Result<()> {
    let store = TaskStore::new(redis);
    match action {
        TaskAction::List { thread_id, limit } => {
            let ids = store.list_for_thread(&thread_id, limit).await?;
            for id in ids {
                println!("{id}");
            }
        }
        TaskAction::Get { task_id, thread_id, json } => {
            let task = store.get(&task_id, &thread_id).await?;
            match task {
                Some(t) if json => println!("{}", serde_json::to_string_pretty(&t)?),
                Some(t) => println!("{} [{}]", t.task_id, t.status.as_str()),
                None => println!("task {task_id} not found"),
            }
        }
        TaskAction::Delete { task_id, thread_id } => {
            store.delete(&task_id, &thread_id).await?;
            println!("deleted task {task_id}");
        }
    }
    Ok(())
}

async fn handle_cache(action: CacheAction, redis: redis::aio::ConnectionManager) -> anyhow::Result<()> {
    let manager = ToolManager::new(redis, Vec::new(), std::collections::HashMap::new());
    match action {
        CacheAction::Clear { instance, all } => {
            let scope = if all { None } else { instance.as_deref() };
            let cleared = manager.clear_cache(scope).await?;
            println!("cleared {cleared} cache entries");
        }
        CacheAction::Stats { json } => {
            let defs = manager.list_definitions();
            if json {
                println!("{}", serde_json::json!({ "tool_count": defs.len() }));
            } else {
                println!("{} tool definitions registered", defs.len());
            }
        }
    }
    Ok(())
}

async fn handle_knowledge(action: KnowledgeAction, redis: redis::aio::ConnectionManager) -> anyhow::Result<()> {
    let store = KnowledgeStore::new(redis);
    match action {
        KnowledgeAction::Fragments { query, limit, json } => {
            let chunks = store.search_text(&query, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                for c in &chunks {
                    println!("{} ({}): {}", c.title, c.source, &c.content[..c.content.len().min(120)]);
                }
            }
        }
        KnowledgeAction::Related { document_hash, chunk_index, window, json } => {
            let chunks = store.related_window(&document_hash, chunk_index, window).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                for c in &chunks {
                    let marker = if c.is_target_chunk { "*" } else { " " };
                    println!("{marker} chunk {} — {}", c.chunk_index, c.title);
                }
            }
        }
    }
    Ok(())
}
