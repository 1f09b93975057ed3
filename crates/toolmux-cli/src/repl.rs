//! Interactive chat loop

use std::sync::Arc;

use console::style;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use toolmux_core::Agent;

use crate::print_tool;

const HELP: &str = "Commands: /tools, /clear, /help, /quit";

pub async fn run(agent: Arc<Agent>) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;

    let tools = agent.tools().await;
    println!();
    println!(
        "{} {}",
        style("Toolmux").bold().cyan(),
        style(format!("- {} tools available. {}", tools.len(), HELP)).dim()
    );
    println!();

    let result = chat_loop(&agent, &mut editor).await;

    for (name, e) in agent.shutdown().await {
        let warning = format!("Warning: {} did not shut down cleanly: {}", name, e);
        eprintln!("{}", style(warning).yellow());
    }
    result
}

async fn chat_loop(agent: &Agent, editor: &mut DefaultEditor) -> anyhow::Result<()> {
    loop {
        // readline blocks; keep the runtime's other workers free
        let prompt = format!("{} ", style("You>").bold().blue());
        let line = tokio::task::block_in_place(|| editor.readline(&prompt));

        let line = match line {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        editor.add_history_entry(input)?;

        match input {
            "/quit" | "/exit" => return Ok(()),
            "/help" => println!("{}", style(HELP).dim()),
            "/clear" => {
                agent.clear_history().await;
                println!("{}", style("Conversation cleared").dim());
            }
            "/tools" => {
                let tools = agent.tools().await;
                if tools.is_empty() {
                    println!("  {}", style("No tools available").dim());
                }
                for tool in &tools {
                    print_tool(tool);
                }
            }
            message => match agent.chat(message).await {
                Ok(reply) => {
                    println!();
                    println!("{}: {}", style("Assistant").bold().green(), reply);
                    println!();
                }
                Err(e) => println!("{}", style(format!("Error: {}", e)).red()),
            },
        }
    }
}
