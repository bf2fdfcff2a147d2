//! Commands every remote endpoint offers.

use std::thread;
use std::time::Duration;

use crate::registry::CommandRegistry;
use crate::registry::CommandResult;
use crate::registry::Invocation;

pub fn register_builtins(registry: &mut CommandRegistry) {
    registry
        .register("echo", "echo <text>...", "Prints its arguments", echo)
        .register(
            "prompt",
            "prompt [question]",
            "Asks a question and repeats the answer",
            prompt,
        )
        .register(
            "countdown",
            "countdown <count> [interval_ms]",
            "Counts down in place; any input cancels",
            countdown,
        )
        .register("clear", "clear", "Clears the operator's screen", clear)
        .register(
            "log",
            "log <source> <message>...",
            "Adds an entry to the remote log",
            log,
        )
        .register(
            "stream",
            "stream <source> <value>",
            "Publishes a value on a telemetry stream",
            stream,
        );
}

fn echo(inv: &mut Invocation<'_>) -> CommandResult {
    let text = inv.args.rest().join(" ");
    inv.console.print(&format!("{}\n", text));
    Ok(())
}

fn prompt(inv: &mut Invocation<'_>) -> CommandResult {
    let question = inv.args.rest().join(" ");
    let question = if question.is_empty() {
        "Input".to_string()
    } else {
        question
    };
    inv.console.print(&format!("{}: ", question));
    let answer = inv.console.read_input_line()?;
    inv.console.print(&format!("You said: {}\n", answer));
    Ok(())
}

fn countdown(inv: &mut Invocation<'_>) -> CommandResult {
    let count: u32 = inv.args.require_parsed("count")?;
    let interval_ms: u64 = inv.args.optional_parsed("interval_ms", 1000)?;
    inv.args.finish()?;

    let console = inv.console;
    for remaining in (1..=count).rev() {
        console.print(&format!("{}...\n", remaining));
        console.flush();
        thread::sleep(Duration::from_millis(interval_ms));
        if console.has_input_ready()? {
            console.clear_waiting_input_lines();
            console.print("Cancelled\n");
            return Ok(());
        }
        console.move_up(1);
        console.clear_line();
    }
    console.print("Liftoff\n");
    Ok(())
}

fn clear(inv: &mut Invocation<'_>) -> CommandResult {
    inv.args.finish()?;
    inv.console.clear();
    Ok(())
}

fn log(inv: &mut Invocation<'_>) -> CommandResult {
    let source = inv.args.require("source")?;
    let message = inv.args.rest().join(" ");
    if message.is_empty() {
        return Err(crate::error::CommandError::bad_arguments("missing <message>"));
    }
    inv.telemetry.log(&source, &message);
    inv.console.print("Logged\n");
    Ok(())
}

fn stream(inv: &mut Invocation<'_>) -> CommandResult {
    let source = inv.args.require("source")?;
    let value = inv.args.require("value")?;
    inv.args.finish()?;
    inv.telemetry.stream(&source, &value);
    Ok(())
}
