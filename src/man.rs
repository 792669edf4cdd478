use crate::db::{Database, ManPatch, NewMan};
use crate::errors::{AppError, AppResult};
use crate::models::{CreateManPayload, Man, ManFilter, UpdateManPayload, DEL_DELETED, FLAG_ON, STATE_PUBLISHED};
use crate::policy;
use std::sync::Arc;

/// Manual lifecycle: site-scoped creation, owner-scoped patches, listing and
/// visibility-checked detail.
#[derive(Debug, Clone)]
pub struct ManService {
    db: Arc<Database>,
}

impl ManService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, payload: CreateManPayload) -> AppResult<Man> {
        if payload.site_id.is_empty() {
            return Err(AppError::Validation("siteId cannot be empty".to_string()));
        }
        if payload.name.is_empty() {
            return Err(AppError::Validation("name cannot be empty".to_string()));
        }
        if payload.create_by.is_empty() {
            return Err(AppError::Validation("createBy cannot be empty".to_string()));
        }

        if self.db.count_live_sites(&payload.site_id, &payload.create_by)? <= 0 {
            tracing::warn!(site_id = %payload.site_id, user_id = %payload.create_by, "manual create on foreign or missing site");
            return Err(AppError::Authorization("this site cannot find".to_string()));
        }

        let man = self.db.insert_man(NewMan {
            name: payload.name,
            cover: payload.cover,
            des: payload.des,
            state: payload.state.unwrap_or(STATE_PUBLISHED),
            create_by: payload.create_by,
            site_id: payload.site_id,
            enable_comment: payload.enable_comment.unwrap_or(FLAG_ON),
            enable_praise: payload.enable_praise.unwrap_or(FLAG_ON),
        })?;

        tracing::info!(man_id = %man.id, site_id = %man.site_id, user_id = %man.create_by, "manual created");
        Ok(man)
    }

    /// Patches a live manual owned by `actor`. `del` only ever moves to the
    /// deletion sentinel; any other value is dropped before the write.
    pub fn update(&self, actor: &str, payload: UpdateManPayload) -> AppResult<Man> {
        let man_id = payload
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation("id cannot be empty".to_string()))?;

        let patch = ManPatch {
            name: payload.name,
            cover: payload.cover,
            des: payload.des,
            state: payload.state,
            del: payload.del.filter(|del| *del == DEL_DELETED),
            enable_comment: payload.enable_comment,
            enable_praise: payload.enable_praise,
            admins: payload.admins.map(dedup_admins),
        };
        if patch.name.as_deref() == Some("") {
            return Err(AppError::Validation("name cannot be empty".to_string()));
        }

        let man = self
            .db
            .update_man(&man_id, actor, &patch)?
            .ok_or_else(|| AppError::NotFound("this man cannot find".to_string()))?;

        if man.del == DEL_DELETED {
            tracing::info!(man_id = %man.id, user_id = actor, "manual deleted");
        } else {
            tracing::info!(man_id = %man.id, user_id = actor, "manual updated");
        }
        Ok(man)
    }

    pub fn find(&self, filter: &ManFilter) -> AppResult<Vec<Man>> {
        let mans = self.db.find_mans(filter)?;
        tracing::debug!(count = mans.len(), "manual query");
        Ok(mans)
    }

    pub fn detail(&self, man_id: &str, actor: Option<&str>) -> AppResult<Man> {
        let man = self
            .db
            .get_man(man_id)?
            .ok_or_else(|| AppError::NotFound("man cannot find".to_string()))?;

        policy::ensure_readable(
            man.state,
            actor,
            std::iter::once(man.create_by.as_str()).chain(man.admins.iter().map(String::as_str)),
        )?;
        Ok(man)
    }
}

fn dedup_admins(admins: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(admins.len());
    for admin in admins {
        if !admin.is_empty() && !seen.contains(&admin) {
            seen.push(admin);
        }
    }
    seen
}
