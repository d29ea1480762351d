use std::path::{Path, PathBuf};
use std::{env, fs};

use rand::Rng;

use crate::error::SecurityError;

const JWT_SECRET: &str = "jwt.secret";
const MIN_SECRET_LEN: usize = 32;

#[cfg(debug_assertions)]
pub const DEFAULT_BCRYPT_COST: u32 = 4;
#[cfg(not(debug_assertions))]
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Signing material for auth tokens and password hashing parameters.
#[derive(Clone)]
pub struct Security {
    pub jwt_secret: Vec<u8>,
    pub bcrypt_cost: u32,
}

impl std::fmt::Debug for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Security")
            .field("jwt_secret", &"<hidden>")
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

#[inline]
fn security_dir() -> PathBuf {
    PathBuf::from(env::var("SECURITY_DIR").unwrap_or("./security".to_string()))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SecurityError + '_ {
    move |source| SecurityError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl Security {
    pub fn with_secret(secret: impl Into<Vec<u8>>) -> Result<Security, SecurityError> {
        let jwt_secret = secret.into();
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(SecurityError::WeakSecret {
                min: MIN_SECRET_LEN,
                len: jwt_secret.len(),
            });
        }

        Ok(Security {
            jwt_secret,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        })
    }

    pub fn load() -> Result<Security, SecurityError> {
        if let Ok(secret) = env::var("JWT_SECRET") {
            tracing::info!("Using JWT secret from environment.");
            return Security::with_secret(secret);
        }

        let dir = security_dir();
        let secret_path = dir.join(JWT_SECRET);

        tracing::info!("Loading JWT signing secret...");
        match fs::read(&secret_path) {
            Ok(secret) => {
                tracing::info!("JWT secret found and loaded.");
                Security::with_secret(secret)
            }
            Err(_) => {
                tracing::info!(
                    "JWT secret not found in '{}'. Generating a new one.",
                    secret_path.display()
                );
                fs::create_dir_all(&dir).map_err(io_error(&dir))?;

                let mut secret = [0u8; 64];
                rand::thread_rng().fill(&mut secret[..]);
                fs::write(&secret_path, secret).map_err(io_error(&secret_path))?;

                Security::with_secret(secret.to_vec())
            }
        }
    }
}
