//! The in-process identity provider.
//!
//! Accounts are seeded from configuration with argon2 PHC password hashes.
//! Successful logins mint opaque bearer tokens: 32 random bytes, hex-encoded.
//! Only the SHA-256 digest of each token is kept, so the token table never
//! holds a usable credential.
//!
//! Device accounts (`device = true`) are embedded clients. They may log in
//! like a user or present `Authorization: Device base64(uid:secret)` on
//! every request, and they are granted full access.

use std::{
  collections::HashMap,
  sync::{PoisonError, RwLock},
};

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use fleetwatch_core::Session;
use rand_core::{OsRng, RngCore as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum IdentityError {
  #[error("invalid email or password")]
  InvalidCredentials,

  #[error("invalid or expired token")]
  InvalidToken,

  #[error("no account for {0}")]
  UnknownAccount(String),

  #[error("password hashing failed: {0}")]
  Hash(String),
}

pub type Result<T, E = IdentityError> = std::result::Result<T, E>;

// ─── Configuration ───────────────────────────────────────────────────────────

/// One `[[accounts]]` entry in the server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
  pub uid:           String,
  pub email:         String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
  #[serde(default)]
  pub display_name:  Option<String>,
  #[serde(default)]
  pub admin:         bool,
  #[serde(default)]
  pub device:        bool,
}

// ─── Principals ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
  User,
  Device,
}

/// The authenticated caller, as returned by `/auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
  pub uid:          String,
  pub email:        String,
  pub display_name: Option<String>,
  pub is_admin:     bool,
  pub kind:         PrincipalKind,
}

impl Principal {
  /// Admins and devices may call admin-only endpoints.
  pub fn has_full_access(&self) -> bool { self.is_admin || self.kind == PrincipalKind::Device }

  /// The data access session for requests made by this principal.
  pub fn session(&self) -> Session { Session::new(&self.email) }
}

// ─── Provider ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Account {
  uid:           String,
  email:         String,
  password_hash: String,
  display_name:  Option<String>,
  is_admin:      bool,
  device:        bool,
}

impl Account {
  fn principal(&self) -> Principal {
    Principal {
      uid:          self.uid.clone(),
      email:        self.email.clone(),
      display_name: self.display_name.clone(),
      is_admin:     self.is_admin,
      kind:         if self.device {
        PrincipalKind::Device
      } else {
        PrincipalKind::User
      },
    }
  }
}

impl From<AccountConfig> for Account {
  fn from(c: AccountConfig) -> Self {
    Self {
      uid:           c.uid,
      email:         c.email,
      password_hash: c.password_hash,
      display_name:  c.display_name,
      is_admin:      c.admin,
      device:        c.device,
    }
  }
}

/// Verifies credentials, issues bearer tokens, and manages profiles.
#[derive(Debug, Default)]
pub struct IdentityProvider {
  /// Keyed by uid.
  accounts: RwLock<HashMap<String, Account>>,
  /// SHA-256 hex of the token → uid.
  tokens:   RwLock<HashMap<String, String>>,
}

impl IdentityProvider {
  pub fn new(accounts: impl IntoIterator<Item = AccountConfig>) -> Self {
    let accounts = accounts
      .into_iter()
      .map(|c| (c.uid.clone(), Account::from(c)))
      .collect();
    Self {
      accounts: RwLock::new(accounts),
      tokens:   RwLock::default(),
    }
  }

  /// Produce an argon2 PHC string for `password`.
  pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map(|h| h.to_string())
      .map_err(|e| IdentityError::Hash(e.to_string()))
  }

  /// Check an email/password pair and mint a bearer token.
  pub fn login(&self, email: &str, password: &str) -> Result<(Principal, String)> {
    let account = self
      .find_by_email(email)
      .ok_or(IdentityError::InvalidCredentials)?;
    verify_password(password, &account.password_hash)?;

    let token = new_token();
    self
      .tokens
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(digest(&token), account.uid.clone());

    tracing::debug!(uid = %account.uid, "token issued");
    Ok((account.principal(), token))
  }

  /// Revoke `token`. Unknown tokens are ignored.
  pub fn logout(&self, token: &str) {
    self
      .tokens
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&digest(token));
  }

  pub fn resolve_token(&self, token: &str) -> Result<Principal> {
    let uid = self
      .tokens
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&digest(token))
      .cloned()
      .ok_or(IdentityError::InvalidToken)?;
    // The account may have vanished since the token was issued.
    self.profile(&uid).map_err(|_| IdentityError::InvalidToken)
  }

  /// Verify a device credential. Only device accounts are accepted.
  pub fn verify_device(&self, uid: &str, secret: &str) -> Result<Principal> {
    let account = self
      .account(uid)
      .filter(|a| a.device)
      .ok_or(IdentityError::InvalidCredentials)?;
    verify_password(secret, &account.password_hash)?;
    Ok(account.principal())
  }

  pub fn profile(&self, uid: &str) -> Result<Principal> {
    self
      .account(uid)
      .map(|a| a.principal())
      .ok_or_else(|| IdentityError::UnknownAccount(uid.to_owned()))
  }

  pub fn change_password(&self, uid: &str, current: &str, new: &str) -> Result<()> {
    let account = self
      .account(uid)
      .ok_or_else(|| IdentityError::UnknownAccount(uid.to_owned()))?;
    verify_password(current, &account.password_hash)?;
    let hash = Self::hash_password(new)?;

    let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(account) = accounts.get_mut(uid) {
      account.password_hash = hash;
    }
    Ok(())
  }

  /// Accept a reset request for a known email. Delivery is out of scope;
  /// the request is only recorded.
  pub fn request_password_reset(&self, email: &str) -> Result<()> {
    let account = self
      .find_by_email(email)
      .ok_or_else(|| IdentityError::UnknownAccount(email.to_owned()))?;
    tracing::info!(uid = %account.uid, "password reset requested");
    Ok(())
  }

  pub fn update_profile(
    &self,
    uid: &str,
    display_name: Option<String>,
    is_admin: Option<bool>,
  ) -> Result<Principal> {
    let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
    let account = accounts
      .get_mut(uid)
      .ok_or_else(|| IdentityError::UnknownAccount(uid.to_owned()))?;
    if let Some(name) = display_name {
      account.display_name = Some(name);
    }
    if let Some(admin) = is_admin {
      account.is_admin = admin;
    }
    Ok(account.principal())
  }

  fn account(&self, uid: &str) -> Option<Account> {
    self
      .accounts
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(uid)
      .cloned()
  }

  fn find_by_email(&self, email: &str) -> Option<Account> {
    let email = email.trim();
    self
      .accounts
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .find(|a| a.email.eq_ignore_ascii_case(email))
      .cloned()
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn verify_password(password: &str, phc: &str) -> Result<()> {
  let parsed = PasswordHash::new(phc).map_err(|_| IdentityError::InvalidCredentials)?;
  Argon2::default()
    .verify_password(password.as_bytes(), &parsed)
    .map_err(|_| IdentityError::InvalidCredentials)
}

fn new_token() -> String {
  let mut bytes = [0u8; 32];
  OsRng.fill_bytes(&mut bytes);
  hex::encode(bytes)
}

fn digest(token: &str) -> String { hex::encode(Sha256::digest(token.as_bytes())) }
