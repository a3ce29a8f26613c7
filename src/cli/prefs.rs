use anyhow::Result;

use crate::context::SmartContext;
use crate::model::UserPreferences;

pub fn show(ctx: &SmartContext, user_id: &str) -> Result<()> {
    let block = ctx.build_user_context(user_id);
    if block.is_empty() {
        println!("No preferences stored for '{}'.", user_id);
    } else {
        println!("{}", block);
    }
    Ok(())
}

/// Merge the given fields over whatever is already stored
pub fn set(
    ctx: &SmartContext,
    user_id: String,
    language: Option<String>,
    skill_level: Option<String>,
    notes: Option<String>,
) -> Result<()> {
    let current = ctx.store().get_user_preferences(&user_id)?.unwrap_or_default();
    let prefs = UserPreferences {
        user_id,
        language: language.or(current.language),
        skill_level: skill_level.or(current.skill_level),
        style_notes: notes.or(current.style_notes),
    };
    ctx.set_user_preferences(&prefs)?;
    println!("Preferences saved for '{}'", prefs.user_id);
    Ok(())
}
