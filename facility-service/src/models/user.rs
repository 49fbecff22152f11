use chrono::{DateTime, Utc};

use super::fields::{missing_required, normalize, EntityState, FieldKind, FieldSpec};
use crate::pipeline::RequestScope;
use crate::services::ServiceError;
use crate::store::{
    Column, ColumnType, Direction, Query, Record, Row, StoreError, TableSchema, Tx,
};
use crate::utils::password::{hash_password, verify_password, Password};

pub static USERS: TableSchema = TableSchema {
    name: "users",
    columns: &[
        Column::new("login", ColumnType::Text),
        Column::nullable("password_hash", ColumnType::Text),
        Column::nullable("name", ColumnType::Text),
        Column::nullable("surname", ColumnType::Text),
        Column::nullable("email", ColumnType::Text),
        Column::nullable("phone", ColumnType::Text),
        Column::new("is_locked", ColumnType::Bool),
        Column::new("is_superuser", ColumnType::Bool),
        Column::new("is_support", ColumnType::Bool),
        Column::nullable("avatar", ColumnType::Text),
        Column::nullable("unix_group", ColumnType::Text),
        Column::nullable("home_dir", ColumnType::Text),
        Column::nullable("activation_code_hash", ColumnType::Text),
        Column::nullable("activation_code_expires", ColumnType::Time),
    ],
    unique: &[&["login"], &["email"], &["unix_group"], &["home_dir"]],
    foreign_keys: &[],
};

pub const LOGIN: FieldSpec = FieldSpec::new("login", FieldKind::Slug)
    .length(1, 100)
    .required();
pub const NAME: FieldSpec = FieldSpec::new("name", FieldKind::Text).length(1, 100);
pub const SURNAME: FieldSpec = FieldSpec::new("surname", FieldKind::Text).length(1, 100);
pub const EMAIL: FieldSpec = FieldSpec::new("email", FieldKind::Email).length(3, 254);
pub const PHONE: FieldSpec = FieldSpec::new("phone", FieldKind::Phone).length(3, 20);
pub const AVATAR: FieldSpec = FieldSpec::new("avatar", FieldKind::Text).length(1, 256);
pub const PASSWORD: FieldSpec = FieldSpec::new("password", FieldKind::Text).length(1, 256);
pub const UNIX_GROUP: FieldSpec = FieldSpec::new("unix_group", FieldKind::Text).read_only();
pub const HOME_DIR: FieldSpec = FieldSpec::new("home_dir", FieldKind::Text).read_only();

#[derive(Debug, Clone)]
pub struct User {
    id: i64,
    login: String,
    password_hash: Option<String>,
    name: Option<String>,
    surname: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    is_locked: bool,
    is_superuser: bool,
    is_support: bool,
    avatar: Option<String>,
    unix_group: Option<String>,
    home_dir: Option<String>,
    activation_code_hash: Option<String>,
    activation_code_expires: Option<DateTime<Utc>>,
    state: EntityState,
}

impl User {
    pub fn new(login: &str) -> Result<Self, ServiceError> {
        LOGIN.check_text(login)?;
        Ok(Self {
            id: 0,
            login: login.to_string(),
            password_hash: None,
            name: None,
            surname: None,
            email: None,
            phone: None,
            is_locked: false,
            is_superuser: false,
            is_support: false,
            avatar: None,
            unix_group: None,
            home_dir: None,
            activation_code_hash: None,
            activation_code_expires: None,
            state: EntityState::Creating,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn surname(&self) -> Option<&str> {
        self.surname.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn avatar(&self) -> Option<&str> {
        self.avatar.as_deref()
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    pub fn is_superuser(&self) -> bool {
        self.is_superuser
    }

    pub fn is_support(&self) -> bool {
        self.is_support
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn unix_group(&self) -> Option<&str> {
        self.unix_group.as_deref()
    }

    pub fn home_dir(&self) -> Option<&str> {
        self.home_dir.as_deref()
    }

    pub fn activation_code_hash(&self) -> Option<&str> {
        self.activation_code_hash.as_deref()
    }

    pub fn activation_code_expires(&self) -> Option<DateTime<Utc>> {
        self.activation_code_expires
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    /// "Name Surname" when known, the login otherwise. Used as the GECOS
    /// comment of the host account.
    pub fn display_name(&self) -> String {
        let full = [self.name.as_deref(), self.surname.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.login.clone()
        } else {
            full
        }
    }

    fn touch(&mut self) {
        self.state = self.state.touched();
    }

    pub fn set_login(&mut self, login: &str) -> Result<(), ServiceError> {
        LOGIN.check_text(login)?;
        self.login = login.to_string();
        self.touch();
        Ok(())
    }

    pub fn set_name(&mut self, name: Option<String>) -> Result<(), ServiceError> {
        let name = normalize(name);
        NAME.check_opt_text(name.as_deref())?;
        self.name = name;
        self.touch();
        Ok(())
    }

    pub fn set_surname(&mut self, surname: Option<String>) -> Result<(), ServiceError> {
        let surname = normalize(surname);
        SURNAME.check_opt_text(surname.as_deref())?;
        self.surname = surname;
        self.touch();
        Ok(())
    }

    pub fn set_email(&mut self, email: Option<String>) -> Result<(), ServiceError> {
        let email = normalize(email).map(|e| e.to_lowercase());
        EMAIL.check_opt_text(email.as_deref())?;
        self.email = email;
        self.touch();
        Ok(())
    }

    pub fn set_phone(&mut self, phone: Option<String>) -> Result<(), ServiceError> {
        let phone = normalize(phone);
        PHONE.check_opt_text(phone.as_deref())?;
        self.phone = phone;
        self.touch();
        Ok(())
    }

    pub fn set_avatar(&mut self, avatar: Option<String>) -> Result<(), ServiceError> {
        let avatar = normalize(avatar);
        AVATAR.check_opt_text(avatar.as_deref())?;
        self.avatar = avatar;
        self.touch();
        Ok(())
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.is_locked = locked;
        self.touch();
    }

    pub fn set_superuser(&mut self, superuser: bool) {
        self.is_superuser = superuser;
        self.touch();
    }

    pub(crate) fn set_support(&mut self, support: bool) {
        self.is_support = support;
        self.touch();
    }

    pub fn set_password(&mut self, password: &Password) -> Result<(), ServiceError> {
        PASSWORD.check_text(password.expose())?;
        self.password_hash = Some(hash_password(password)?);
        self.touch();
        Ok(())
    }

    pub fn clear_password(&mut self) {
        self.password_hash = None;
        self.touch();
    }

    /// Users without a password never verify.
    pub fn verify_password(&self, password: &Password) -> bool {
        self.password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash))
    }

    /// Public setter of the host account name; always rejected.
    pub fn set_unix_group(&mut self, _value: Option<String>) -> Result<(), ServiceError> {
        UNIX_GROUP.check_writable()
    }

    pub fn set_home_dir(&mut self, _value: Option<String>) -> Result<(), ServiceError> {
        HOME_DIR.check_writable()
    }

    pub(crate) fn assign_posix(&mut self, unix_group: Option<String>, home_dir: Option<String>) {
        self.unix_group = unix_group;
        self.home_dir = home_dir;
        self.touch();
    }

    pub(crate) fn set_activation_code(&mut self, hash: Option<String>, expires: Option<DateTime<Utc>>) {
        self.activation_code_hash = hash;
        self.activation_code_expires = expires;
        self.touch();
    }

    pub async fn create(&mut self, scope: &mut RequestScope) -> Result<(), ServiceError> {
        if self.state != EntityState::Creating {
            return Err(ServiceError::OperationNotPermitted(
                "user already exists".to_string(),
            ));
        }
        let missing = missing_required(&[(&LOGIN, !self.login.is_empty())]);
        if !missing.is_empty() {
            return Err(ServiceError::FieldRequired(missing));
        }

        scope.projector.assign_user_names(self);
        scope.tx.insert(self).await?;
        scope.projector.user_created(self).await?;
        self.state = EntityState::Saved;

        tracing::info!(user_id = self.id, login = %self.login, "User created");
        Ok(())
    }

    pub async fn update(&mut self, scope: &mut RequestScope) -> Result<(), ServiceError> {
        self.ensure_persisted()?;
        let previous = scope.tx.get::<User>(self.id).await?;

        if previous.login != self.login {
            scope.projector.user_renamed(&previous, self).await?;
        } else if previous.display_name() != self.display_name() {
            scope.projector.user_changed(self).await?;
        }
        scope.tx.update(self).await?;
        self.state = EntityState::Saved;

        tracing::info!(user_id = self.id, "User updated");
        Ok(())
    }

    /// Fails with `EntityConstraintFailed` while the user governs a group.
    pub async fn delete(&mut self, scope: &mut RequestScope) -> Result<(), ServiceError> {
        self.ensure_persisted()?;
        scope.tx.delete::<User>(self.id).await?;
        scope.projector.user_deleted(self).await?;
        scope.forget_access();
        self.state = EntityState::Deleted;

        tracing::info!(user_id = self.id, login = %self.login, "User deleted");
        Ok(())
    }

    fn ensure_persisted(&self) -> Result<(), ServiceError> {
        match self.state {
            EntityState::Creating => Err(ServiceError::OperationNotPermitted(
                "user has not been created".to_string(),
            )),
            EntityState::Deleted => Err(ServiceError::OperationNotPermitted(
                "user has been deleted".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub async fn get(tx: &mut Tx, id: i64) -> Result<User, ServiceError> {
        tx.find::<User>(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("User {}", id)))
    }

    pub async fn find_by_login(tx: &mut Tx, login: &str) -> Result<Option<User>, ServiceError> {
        Ok(tx.find_by::<User>("login", login).await?)
    }

    pub async fn find_by_email(tx: &mut Tx, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(tx.find_by::<User>("email", email.trim().to_lowercase()).await?)
    }

    pub async fn list(tx: &mut Tx) -> Result<Vec<User>, ServiceError> {
        Ok(tx
            .list::<User>(Query::new().order_by("login", Direction::Asc))
            .await?)
    }
}

impl Record for User {
    const TABLE: &'static TableSchema = &USERS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("login", &self.login)
            .with("password_hash", self.password_hash.clone())
            .with("name", self.name.clone())
            .with("surname", self.surname.clone())
            .with("email", self.email.clone())
            .with("phone", self.phone.clone())
            .with("is_locked", self.is_locked)
            .with("is_superuser", self.is_superuser)
            .with("is_support", self.is_support)
            .with("avatar", self.avatar.clone())
            .with("unix_group", self.unix_group.clone())
            .with("home_dir", self.home_dir.clone())
            .with("activation_code_hash", self.activation_code_hash.clone())
            .with("activation_code_expires", self.activation_code_expires)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            login: row.text("login")?,
            password_hash: row.opt_text("password_hash")?,
            name: row.opt_text("name")?,
            surname: row.opt_text("surname")?,
            email: row.opt_text("email")?,
            phone: row.opt_text("phone")?,
            is_locked: row.bool("is_locked")?,
            is_superuser: row.bool("is_superuser")?,
            is_support: row.bool("is_support")?,
            avatar: row.opt_text("avatar")?,
            unix_group: row.opt_text("unix_group")?,
            home_dir: row.opt_text("home_dir")?,
            activation_code_hash: row.opt_text("activation_code_hash")?,
            activation_code_expires: row.opt_time("activation_code_expires")?,
            state: EntityState::Loaded,
        })
    }
}
