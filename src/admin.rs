//! Admin commands
//!
//! User management runs through one checked entry point. Every command
//! re-authorizes the actor against the store; a deactivated admin loses
//! these rights immediately.

use tracing::info;

use crate::error::{BotError, Result};
use crate::models::{User, UserRole};
use crate::store::LedgerStore;

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    AddUser {
        external_id: i64,
        role: UserRole,
        full_name: Option<String>,
    },
    RemoveUser {
        external_id: i64,
    },
    BlockUser {
        external_id: i64,
    },
    UnblockUser {
        external_id: i64,
    },
    ListUsers,
}

impl AdminCommand {
    /// Parse a slash command: "/adduser 123 foreman Иванов",
    /// "/removeuser 123", "/blockuser 123", "/unblockuser 123", "/users".
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let command = parts.next()?;
        match command {
            "/users" => Some(AdminCommand::ListUsers),
            "/adduser" => {
                let external_id = parts.next()?.parse().ok()?;
                let role = match parts.next()? {
                    "admin" => UserRole::Admin,
                    "foreman" => UserRole::Foreman,
                    _ => return None,
                };
                let rest: Vec<&str> = parts.collect();
                let full_name = if rest.is_empty() {
                    None
                } else {
                    Some(rest.join(" "))
                };
                Some(AdminCommand::AddUser {
                    external_id,
                    role,
                    full_name,
                })
            }
            "/removeuser" => Some(AdminCommand::RemoveUser {
                external_id: parts.next()?.parse().ok()?,
            }),
            "/blockuser" => Some(AdminCommand::BlockUser {
                external_id: parts.next()?.parse().ok()?,
            }),
            "/unblockuser" => Some(AdminCommand::UnblockUser {
                external_id: parts.next()?.parse().ok()?,
            }),
            _ => None,
        }
    }
}

async fn authorize_admin(store: &dyn LedgerStore, actor_external_id: i64) -> Result<User> {
    let user = store
        .user_by_external_id(actor_external_id)
        .await?
        .ok_or_else(|| BotError::Authorization("unknown user".to_string()))?;
    if !user.is_active {
        return Err(BotError::Authorization("user is blocked".to_string()));
    }
    if !user.is_admin() {
        return Err(BotError::Authorization("admin rights required".to_string()));
    }
    Ok(user)
}

async fn active_admin_count(store: &dyn LedgerStore) -> Result<usize> {
    Ok(store
        .list_users()
        .await?
        .iter()
        .filter(|u| u.is_admin() && u.is_active)
        .count())
}

/// Execute an admin command on behalf of `actor_external_id` and return
/// the reply text.
pub async fn execute(
    store: &dyn LedgerStore,
    actor_external_id: i64,
    command: AdminCommand,
) -> Result<String> {
    authorize_admin(store, actor_external_id).await?;

    match command {
        AdminCommand::AddUser {
            external_id,
            role,
            full_name,
        } => {
            let user = User::new(external_id, role, full_name);
            match store.create_user(user).await {
                Ok(_) => {
                    info!(external_id, ?role, "User added");
                    Ok(format!("Пользователь {} добавлен.", external_id))
                }
                Err(BotError::Conflict(_)) => {
                    Ok(format!("Пользователь {} уже существует.", external_id))
                }
                Err(e) => Err(e),
            }
        }
        AdminCommand::RemoveUser { external_id } => {
            guard_last_admin(store, external_id).await?;
            if store.remove_user(external_id).await? {
                info!(external_id, "User removed");
                Ok(format!("Пользователь {} удален.", external_id))
            } else {
                Ok(format!("Пользователь {} не найден.", external_id))
            }
        }
        AdminCommand::BlockUser { external_id } => {
            guard_last_admin(store, external_id).await?;
            match store.set_user_active(external_id, false).await? {
                Some(_) => {
                    info!(external_id, "User blocked");
                    Ok(format!("Пользователь {} заблокирован.", external_id))
                }
                None => Ok(format!("Пользователь {} не найден.", external_id)),
            }
        }
        AdminCommand::UnblockUser { external_id } => {
            match store.set_user_active(external_id, true).await? {
                Some(_) => {
                    info!(external_id, "User unblocked");
                    Ok(format!("Пользователь {} разблокирован.", external_id))
                }
                None => Ok(format!("Пользователь {} не найден.", external_id)),
            }
        }
        AdminCommand::ListUsers => {
            let users = store.list_users().await?;
            if users.is_empty() {
                return Ok("Пользователей нет.".to_string());
            }
            let mut out = String::from("Пользователи:\n");
            for user in users {
                out.push_str(&format!(
                    "{} | {} | {}{}\n",
                    user.external_id,
                    user.role,
                    user.full_name.as_deref().unwrap_or("без имени"),
                    if user.is_active {
                        ""
                    } else {
                        " (заблокирован)"
                    },
                ));
            }
            Ok(out)
        }
    }
}

/// Removing or blocking the last active admin would lock everyone out.
async fn guard_last_admin(store: &dyn LedgerStore, target_external_id: i64) -> Result<()> {
    let target = store.user_by_external_id(target_external_id).await?;
    if let Some(target) = target {
        if target.is_admin() && target.is_active && active_admin_count(store).await? <= 1 {
            return Err(BotError::Conflict(
                "Нельзя удалить или заблокировать последнего администратора.".to_string(),
            ));
        }
    }
    Ok(())
}
