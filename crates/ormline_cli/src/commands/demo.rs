//! Demo command implementation.

use crate::error::{CliError, CliResult};
use clap::ValueEnum;
use ormline_core::{CommitSummary, CoreResult, Value};
use ormline_memory::JournalEntry;
use ormline_testkit::{cycle_metadata, library_metadata, scenarios, TestContext};
use serde::Serialize;
use tracing::info;

/// Built-in scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// An author with two books, then a rename and a cascading remove.
    AuthorBooks,
    /// Three types referencing each other through required foreign keys.
    RequiredCycle,
    /// A book dropped from its author's collection.
    OrphanRemoval,
    /// Two tags related to each other through a self-referencing pivot.
    SelfReferencingTags,
}

impl Scenario {
    /// Returns the scenario name as given on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::AuthorBooks => "author-books",
            Self::RequiredCycle => "required-cycle",
            Self::OrphanRemoval => "orphan-removal",
            Self::SelfReferencingTags => "self-referencing-tags",
        }
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// One commit of a scenario.
#[derive(Debug, Serialize)]
pub struct Step {
    /// What the step does.
    pub label: &'static str,
    /// Commit outcome.
    pub summary: CommitSummary,
    /// Driver operations performed by the commit.
    pub journal: Vec<JournalEntry>,
}

/// Runs the demo command.
pub fn run(scenario: Scenario, format: OutputFormat) -> CliResult<()> {
    info!(scenario = scenario.name(), "running scenario");
    let steps = execute(scenario).map_err(|source| CliError::Scenario {
        scenario: scenario.name(),
        source,
    })?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&steps)?);
        }
        OutputFormat::Text => {
            print_text_output(scenario, &steps);
        }
    }

    Ok(())
}

/// Runs a scenario and returns its commits.
pub fn execute(scenario: Scenario) -> CoreResult<Vec<Step>> {
    let mut recorder = StepRecorder::default();
    match scenario {
        Scenario::AuthorBooks => author_books(&mut recorder)?,
        Scenario::RequiredCycle => required_cycle(&mut recorder)?,
        Scenario::OrphanRemoval => orphan_removal(&mut recorder)?,
        Scenario::SelfReferencingTags => self_referencing_tags(&mut recorder)?,
    }
    Ok(recorder.steps)
}

#[derive(Default)]
struct StepRecorder {
    steps: Vec<Step>,
}

impl StepRecorder {
    fn commit(&mut self, ctx: &mut TestContext, label: &'static str) -> CoreResult<()> {
        ctx.driver.clear_journal();
        let summary = ctx.commit()?;
        self.steps.push(Step {
            label,
            summary,
            journal: ctx.driver.journal(),
        });
        Ok(())
    }
}

fn author_books(recorder: &mut StepRecorder) -> CoreResult<()> {
    let mut ctx = TestContext::new(library_metadata());
    let (author, _) = scenarios::author_with_books(&mut ctx, "Ann", 2)?;
    recorder.commit(&mut ctx, "persist an author with two books")?;

    ctx.set_field(author, "name", Value::from("Anne"))?;
    recorder.commit(&mut ctx, "rename the author")?;

    ctx.remove(author)?;
    recorder.commit(&mut ctx, "remove the author and its books")
}

fn required_cycle(recorder: &mut StepRecorder) -> CoreResult<()> {
    let mut ctx = TestContext::new(cycle_metadata(true));
    let a = ctx.create("A", [("label", "a")])?;
    let b = ctx.create("B", [("label", "b")])?;
    let c = ctx.create("C", [("label", "c")])?;
    ctx.set_field(a, "b", b)?;
    ctx.set_field(b, "c", c)?;
    ctx.set_field(c, "a", a)?;
    ctx.persist(a)?;
    recorder.commit(&mut ctx, "persist A -> B -> C -> A")
}

fn orphan_removal(recorder: &mut StepRecorder) -> CoreResult<()> {
    let mut ctx = TestContext::new(library_metadata());
    let (author, books) = scenarios::author_with_books(&mut ctx, "Ann", 2)?;
    recorder.commit(&mut ctx, "persist an author with two books")?;

    ctx.remove_from_collection(author, "books", &books[..1])?;
    recorder.commit(&mut ctx, "drop the first book from the collection")
}

fn self_referencing_tags(recorder: &mut StepRecorder) -> CoreResult<()> {
    let mut ctx = TestContext::new(library_metadata());
    let first = ctx.create("Tag", [("name", "first")])?;
    let second = ctx.create("Tag", [("name", "second")])?;
    ctx.set_field(first, "related", vec![second])?;
    ctx.set_field(second, "related", vec![first])?;
    ctx.persist(first)?;
    recorder.commit(&mut ctx, "persist two related tags")?;

    ctx.remove_from_collection(first, "related", &[second])?;
    recorder.commit(&mut ctx, "unrelate the first tag")
}

fn print_text_output(scenario: Scenario, steps: &[Step]) {
    println!("Scenario: {}", scenario.name());
    for (i, step) in steps.iter().enumerate() {
        let summary = &step.summary;
        println!();
        println!("[{}] {}", i + 1, step.label);
        println!(
            "  created {}, updated {}, deleted {}, extra updates {}, collections {}",
            summary.created,
            summary.updated,
            summary.deleted,
            summary.extra_updates,
            summary.collections_synchronized
        );
        if !summary.commit_order.is_empty() {
            println!("  order: {}", summary.commit_order.join(", "));
        }
        for entry in &step.journal {
            println!("  {entry}");
        }
    }
}
