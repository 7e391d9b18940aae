use uuid::Uuid;

use super::models::{PermissionLevel, ToolboxAccess, Visibility};
use super::ports::{AccessStore, StoreResult};
use crate::error::{AppError, AppResult};

/// What a viewer may do with a toolbox. Borrow always implies view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    pub can_view: bool,
    pub can_borrow: bool,
}

impl Access {
    pub const NONE: Access = Access {
        can_view: false,
        can_borrow: false,
    };
    pub const VIEW: Access = Access {
        can_view: true,
        can_borrow: false,
    };
    pub const FULL: Access = Access {
        can_view: true,
        can_borrow: true,
    };
}

/// Evaluates owner, public, anonymous, grant, buddy tier in that order.
///
/// A `view` grant is only settled after the buddy tier.
pub async fn evaluate<S>(
    store: &S,
    viewer: Option<Uuid>,
    toolbox: &ToolboxAccess,
) -> StoreResult<Access>
where
    S: AccessStore + ?Sized,
{
    if viewer == Some(toolbox.owner_id) {
        return Ok(Access::FULL);
    }
    if toolbox.visibility == Visibility::Public {
        return Ok(Access::FULL);
    }
    let Some(viewer) = viewer else {
        return Ok(Access::NONE);
    };

    let grant = store.find_grant(toolbox.id, viewer).await?;
    if grant == Some(PermissionLevel::Borrow) {
        return Ok(Access::FULL);
    }
    if toolbox.visibility == Visibility::Buddies && store.is_buddy(viewer, toolbox.owner_id).await?
    {
        return Ok(Access::FULL);
    }
    if grant == Some(PermissionLevel::View) {
        return Ok(Access::VIEW);
    }

    Ok(Access::NONE)
}

pub async fn can_view<S>(store: &S, viewer: Option<Uuid>, toolbox: &ToolboxAccess) -> StoreResult<bool>
where
    S: AccessStore + ?Sized,
{
    Ok(evaluate(store, viewer, toolbox).await?.can_view)
}

pub async fn can_borrow<S>(
    store: &S,
    viewer: Option<Uuid>,
    toolbox: &ToolboxAccess,
) -> StoreResult<bool>
where
    S: AccessStore + ?Sized,
{
    Ok(evaluate(store, viewer, toolbox).await?.can_borrow)
}

/// Loads a toolbox and fails unless `viewer` may see it.
pub async fn viewable_toolbox<S>(
    store: &S,
    viewer: Option<Uuid>,
    toolbox_id: Uuid,
) -> AppResult<ToolboxAccess>
where
    S: AccessStore + ?Sized,
{
    let toolbox = store
        .find_toolbox(toolbox_id)
        .await?
        .ok_or_else(|| AppError::not_found("Toolbox not found"))?;
    if !can_view(store, viewer, &toolbox).await? {
        return Err(AppError::forbidden("You do not have access to this toolbox"));
    }
    Ok(toolbox)
}

/// Loads a toolbox and fails unless `user` owns it.
pub async fn owned_toolbox<S>(store: &S, user: Uuid, toolbox_id: Uuid) -> AppResult<ToolboxAccess>
where
    S: AccessStore + ?Sized,
{
    let toolbox = store
        .find_toolbox(toolbox_id)
        .await?
        .ok_or_else(|| AppError::not_found("Toolbox not found"))?;
    if toolbox.owner_id != user {
        return Err(AppError::forbidden("You do not own this toolbox"));
    }
    Ok(toolbox)
}
