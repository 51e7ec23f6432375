//! Acting identity and the authorization decisions the engine enforces.
//!
//! Authentication happens at the request boundary. Everything below it
//! receives an explicit [`Actor`]; nothing reads an ambient "current user".

use serde::{Deserialize, Serialize};

use crate::error::{ReviewError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    ShopOwner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::ShopOwner => "shop_owner",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "role_user" => Some(Role::User),
            "shop_owner" | "role_shop_owner" => Some(Role::ShopOwner),
            "admin" | "role_admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

impl Actor {
    pub fn new(id: i64, role: Role) -> Self {
        Self { id, role }
    }

    pub fn user(id: i64) -> Self {
        Self::new(id, Role::User)
    }

    pub fn shop_owner(id: i64) -> Self {
        Self::new(id, Role::ShopOwner)
    }

    pub fn admin(id: i64) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A shop owner may not post a top-level review on their own shop.
/// Replies by the owner are fine.
pub fn ensure_not_self_review(actor: &Actor, shop_owner_id: Option<i64>, is_reply: bool) -> Result<()> {
    if is_reply {
        return Ok(());
    }
    if actor.role == Role::ShopOwner && shop_owner_id == Some(actor.id) {
        return Err(ReviewError::unauthorized(
            "shop owners cannot review their own shop",
        ));
    }
    Ok(())
}

/// Only the author edits text or rating. Admins get no override here.
pub fn ensure_author(actor: &Actor, author_id: i64) -> Result<()> {
    if actor.id != author_id {
        return Err(ReviewError::unauthorized("only the author can edit this review"));
    }
    Ok(())
}

pub fn ensure_author_or_admin(actor: &Actor, author_id: i64) -> Result<()> {
    if actor.is_admin() || actor.id == author_id {
        return Ok(());
    }
    Err(ReviewError::unauthorized(
        "only the author or an administrator can do this",
    ))
}

pub fn ensure_shop_owner_or_admin(actor: &Actor, shop_owner_id: Option<i64>) -> Result<()> {
    if actor.is_admin() || shop_owner_id == Some(actor.id) {
        return Ok(());
    }
    Err(ReviewError::unauthorized(
        "only the shop owner or an administrator can do this",
    ))
}

pub fn ensure_admin(actor: &Actor) -> Result<()> {
    if actor.is_admin() {
        return Ok(());
    }
    Err(ReviewError::unauthorized("administrator role required"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_cannot_self_review_top_level() {
        let owner = Actor::shop_owner(7);
        let err = ensure_not_self_review(&owner, Some(7), false).unwrap_err();
        assert!(matches!(err, ReviewError::Unauthorized(_)));
    }

    #[test]
    fn test_owner_can_reply_on_own_shop() {
        let owner = Actor::shop_owner(7);
        ensure_not_self_review(&owner, Some(7), true).unwrap();
    }

    #[test]
    fn test_owner_can_review_other_shop() {
        let owner = Actor::shop_owner(7);
        ensure_not_self_review(&owner, Some(8), false).unwrap();
        ensure_not_self_review(&owner, None, false).unwrap();
    }

    #[test]
    fn test_edit_has_no_admin_override() {
        assert!(ensure_author(&Actor::admin(1), 2).is_err());
        ensure_author(&Actor::user(2), 2).unwrap();
    }

    #[test]
    fn test_delete_allows_admin() {
        ensure_author_or_admin(&Actor::admin(1), 2).unwrap();
        ensure_author_or_admin(&Actor::user(2), 2).unwrap();
        assert!(ensure_author_or_admin(&Actor::user(3), 2).is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("ROLE_ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("shop_owner"), Some(Role::ShopOwner));
        assert_eq!(Role::parse("root"), None);
    }
}
