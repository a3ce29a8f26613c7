use anyhow::Result;

use crate::context::SmartContext;
use crate::model::ProjectMap;

pub fn create(
    ctx: &SmartContext,
    name: String,
    web_path: Option<String>,
    app_path: Option<String>,
) -> Result<()> {
    let id = ctx
        .store()
        .create_project(&name, web_path.as_deref(), app_path.as_deref())?;
    println!("Project '{}' created with ID: {}", name, id);
    Ok(())
}

pub fn show(ctx: &SmartContext, project_id: i64) -> Result<()> {
    let project = ctx
        .store()
        .get_project(project_id)?
        .ok_or_else(|| anyhow::anyhow!("Project not found: {}", project_id))?;

    println!("{:<12} {}", "ID", project.id);
    println!("{:<12} {}", "Name", project.name);
    println!("{:<12} {}", "Web path", project.web_path.unwrap_or_default());
    println!("{:<12} {}", "App path", project.app_path.unwrap_or_default());

    match ctx.get_project_map(project_id)? {
        Some(map) => {
            println!("\nMap:");
            if let Some(count) = map.file_count {
                println!("  files:    {}", count);
            }
            if let Some(language) = map.primary_language {
                println!("  language: {}", language);
            }
            if !map.tech_stack.is_empty() {
                println!("  stack:    {}", map.tech_stack.join(", "));
            }
            if let Some(at) = map.generated_at {
                println!("  built:    {}", at.format("%Y-%m-%d %H:%M"));
            }
        }
        None => println!("\nNo project map."),
    }

    match ctx.get_project_knowledge(project_id)? {
        Some(knowledge) if !knowledge.is_empty() => {
            println!("\nKnowledge:");
            for pattern in &knowledge.coding_patterns {
                println!("  pattern: {}", pattern);
            }
            for gotcha in &knowledge.known_gotchas {
                println!("  gotcha:  {}", gotcha);
            }
        }
        _ => println!("\nNo project knowledge."),
    }
    Ok(())
}

pub fn set_map(
    ctx: &SmartContext,
    project_id: i64,
    files: Option<i64>,
    language: Option<String>,
    stack: Option<String>,
    summary: Option<String>,
) -> Result<()> {
    ensure_project(ctx, project_id)?;
    let tech_stack = stack
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    ctx.set_project_map(&ProjectMap {
        project_id,
        file_count: files,
        primary_language: language,
        tech_stack,
        structure_summary: summary,
        generated_at: Some(chrono::Utc::now()),
    })?;
    println!("Map updated for project {}", project_id);
    Ok(())
}

pub fn add_gotcha(ctx: &SmartContext, project_id: i64, text: String) -> Result<()> {
    ensure_project(ctx, project_id)?;
    if ctx.add_project_gotcha(project_id, &text)? {
        println!("Gotcha added to project {}", project_id);
    } else {
        println!("Gotcha already known (or empty), nothing changed.");
    }
    Ok(())
}

fn ensure_project(ctx: &SmartContext, project_id: i64) -> Result<()> {
    if ctx.store().get_project(project_id)?.is_none() {
        anyhow::bail!("Project not found: {}", project_id);
    }
    Ok(())
}
