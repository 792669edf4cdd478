use crate::errors::{AppError, AppResult};
use crate::models::STATE_DRAFT;

/// Read access to a manual or article.
///
/// An authenticated caller is judged only by membership in `privileged`
/// (owner plus admins), whatever the state. An anonymous caller is judged only
/// by state, and sees exactly the documents whose state is the draft marker.
/// An empty actor id counts as anonymous.
pub fn ensure_readable<'a, I>(state: i32, actor: Option<&str>, privileged: I) -> AppResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    match actor.filter(|user_id| !user_id.is_empty()) {
        Some(user_id) => {
            if privileged.into_iter().any(|member| member == user_id) {
                Ok(())
            } else {
                tracing::warn!(user_id, "read denied for non-member");
                Err(permission_denied())
            }
        }
        None if state == STATE_DRAFT => Ok(()),
        None => {
            tracing::debug!(state, "anonymous read denied");
            Err(permission_denied())
        }
    }
}

/// Write access to a manual's content: its owner or one of its admins.
pub fn ensure_member<'a, I>(actor: &str, privileged: I) -> AppResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    if !actor.is_empty() && privileged.into_iter().any(|member| member == actor) {
        Ok(())
    } else {
        tracing::warn!(user_id = actor, "write denied for non-member");
        Err(permission_denied())
    }
}

fn permission_denied() -> AppError {
    AppError::Authorization("Permission Denied".to_string())
}
