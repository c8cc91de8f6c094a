// src/cli.rs

use clap::{Parser, Subcommand};

use crate::auth::hash_password;
use crate::models::User;
use crate::storage::Database;

#[derive(Parser)]
#[command(name = "nimbusd")]
#[command(about = "Multi-tenant cloud storage server and management CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 启动存储服务器 (默认)
    Server,

    /// 用户管理命令
    #[command(subcommand)]
    User(UserCommands),
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// 创建新用户
    Create {
        /// 用户名
        #[arg(short, long)]
        username: String,

        /// 密码
        #[arg(short, long)]
        password: String,

        /// 授予管理员权限
        #[arg(long)]
        admin: bool,
    },

    /// 列出所有用户
    List,

    /// 重置用户密码
    ResetPassword {
        /// 用户名
        #[arg(short, long)]
        username: String,

        /// 新密码
        #[arg(short, long)]
        password: String,
    },
}

pub struct CliHandler {
    db: Database,
}

impl CliHandler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn handle_user_command(&self, cmd: UserCommands) -> anyhow::Result<()> {
        match cmd {
            UserCommands::Create {
                username,
                password,
                admin,
            } => {
                // 检查用户是否存在
                if self.db.get_user_by_username(&username).await?.is_some() {
                    println!("错误: 用户 '{}' 已存在", username);
                    return Ok(());
                }

                let now = chrono::Utc::now();
                let user = User {
                    id: uuid::Uuid::new_v4().to_string(),
                    username: username.clone(),
                    password_hash: hash_password(&password)?,
                    is_admin: admin,
                    disabled: false,
                    created_at: now,
                    updated_at: now,
                };
                self.db.create_user(&user).await?;
                println!("用户 '{}' 创建成功 (admin: {})", username, admin);
            }

            UserCommands::List => {
                let users = self.db.list_users().await?;
                if users.is_empty() {
                    println!("没有用户");
                    return Ok(());
                }
                for user in users {
                    println!(
                        "{}  {}  admin={}  disabled={}",
                        user.id, user.username, user.is_admin, user.disabled
                    );
                }
            }

            UserCommands::ResetPassword { username, password } => {
                let password_hash = hash_password(&password)?;
                if self.db.update_user_password(&username, &password_hash).await? {
                    println!("用户 '{}' 密码已重置", username);
                } else {
                    println!("错误: 用户 '{}' 不存在", username);
                }
            }
        }
        Ok(())
    }
}
