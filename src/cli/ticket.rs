use anyhow::Result;

use super::resolve_ticket;
use crate::context::SmartContext;
use crate::model::Role;

pub fn create(ctx: &SmartContext, project_id: i64, number: String) -> Result<()> {
    if ctx.store().get_project(project_id)?.is_none() {
        anyhow::bail!("Project not found: {}", project_id);
    }
    let id = ctx.store().create_ticket(project_id, &number)?;
    println!("Ticket '{}' created with ID: {}", number, id);
    Ok(())
}

pub fn say(ctx: &SmartContext, ticket: String, role: String, content: String) -> Result<()> {
    let ticket = resolve_ticket(ctx.store(), &ticket)?;
    let role = Role::parse(&role)
        .ok_or_else(|| anyhow::anyhow!("Unknown role '{}' (user, assistant, system)", role))?;
    if ticket.is_closed() {
        println!("Note: ticket {} is closed.", ticket.ticket_number);
    }

    let msg = ctx.store().append_message(ticket.id, role, &content)?;
    println!(
        "Message #{} appended to {} ({} tokens)",
        msg.id, ticket.ticket_number, msg.token_count
    );
    Ok(())
}

pub fn close(ctx: &SmartContext, ticket: String) -> Result<()> {
    let ticket = resolve_ticket(ctx.store(), &ticket)?;
    ctx.store().set_ticket_status(ticket.id, "closed")?;
    println!("Ticket {} closed", ticket.ticket_number);
    Ok(())
}
