use crate::codec::RowCodec;
use crate::models::{NewUser, User, UserUpdate};
use crate::services::{
    load, load_versioned, DaoError, IdGenerator, IndexManager, WritePlan, WriteStep,
};
use crate::store::{set_row_version, StoreClient, Table};
use std::sync::Arc;
use tracing::instrument;
use validator::Validate;

#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn StoreClient>,
    index: IndexManager,
    ids: Arc<dyn IdGenerator>,
    default_linked_providers: Vec<String>,
}

impl UserRepository {
    pub fn new(
        store: Arc<dyn StoreClient>,
        ids: Arc<dyn IdGenerator>,
        default_linked_providers: Vec<String>,
    ) -> Self {
        Self {
            index: IndexManager::new(store.clone()),
            store,
            ids,
            default_linked_providers,
        }
    }

    /// Create a user, reserving its email and every supplied access key first.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create_user(&self, input: NewUser) -> Result<User, DaoError> {
        input.validate()?;

        let user = User {
            id: self.ids.next_id(),
            email: input.email,
            name: input.name,
            linked_providers: input
                .linked_providers
                .unwrap_or_else(|| self.default_linked_providers.clone()),
            access_keys: input.access_keys,
        };

        let mut plan = WritePlan::new("create_user")
            .then(IndexManager::email_reservation_step(&user.email, &user.id));
        plan.extend(
            user.access_keys
                .keys()
                .map(|token| IndexManager::access_key_step(token, &user.id)),
        );
        plan.push(WriteStep::insert(User::TABLE, user.row_key(), user.encode()?));
        plan.execute(self.store.as_ref()).await?;

        tracing::info!(user_id = %user.id, "User created");
        Ok(user)
    }

    pub async fn user_by_id(&self, id: &str) -> Result<User, DaoError> {
        load::<User>(self.store.as_ref(), id)
            .await?
            .ok_or_else(|| DaoError::not_found(format!("User not found {}", id)))
    }

    pub async fn user_by_email(&self, email: &str) -> Result<User, DaoError> {
        Ok(self.resolve_email(email).await?.0)
    }

    /// Follow the email index to the user row and its version.
    async fn resolve_email(&self, email: &str) -> Result<(User, u64), DaoError> {
        let user_id = self
            .index
            .lookup_by_email(email)
            .await?
            .ok_or_else(|| DaoError::not_found(format!("User not found {}", email)))?;

        match load_versioned::<User>(self.store.as_ref(), &user_id).await? {
            Some((user, version)) if user.email == email => Ok((user, version)),
            Some((user, _)) => Err(IndexManager::divergence(
                Table::UsersByEmail,
                email,
                format!("user {} now has email {}", user.id, user.email),
            )),
            None => Err(IndexManager::divergence(
                Table::UsersByEmail,
                email,
                format!("user {} does not exist", user_id),
            )),
        }
    }

    /// Resolve the owner of an access key.
    ///
    /// A token whose index entry points at a missing user, or at a user that
    /// no longer holds the key, is a divergence and surfaces as not found.
    pub async fn user_by_access_key(&self, token: &str) -> Result<User, DaoError> {
        let user_id = self
            .index
            .lookup_by_access_key(token)
            .await?
            .ok_or_else(|| DaoError::not_found("Access key not found"))?;

        match load::<User>(self.store.as_ref(), &user_id).await? {
            Some(user) if user.has_access_key(token) => Ok(user),
            Some(_) => Err(IndexManager::divergence(
                Table::UsersByAccessKey,
                token,
                format!("user {} no longer holds this key", user_id),
            )),
            None => Err(IndexManager::divergence(
                Table::UsersByAccessKey,
                token,
                format!("user {} does not exist", user_id),
            )),
        }
    }

    /// Apply `update` to the user registered under `email`.
    ///
    /// The submitted access-key map replaces the stored one: new keys are
    /// indexed before the user row is written and dropped keys are released
    /// after it. A concurrent update of the same user fails with
    /// `ConcurrentModification` and leaves the stored user untouched.
    #[instrument(skip(self, update))]
    pub async fn update_user(&self, email: &str, update: UserUpdate) -> Result<User, DaoError> {
        let (current, version) = self.resolve_email(email).await?;

        let mut linked_providers = current.linked_providers.clone();
        for provider in update.linked_providers {
            if !linked_providers.contains(&provider) {
                linked_providers.push(provider);
            }
        }

        let updated = User {
            id: current.id.clone(),
            email: current.email.clone(),
            name: update.name.unwrap_or_else(|| current.name.clone()),
            linked_providers,
            access_keys: update.access_keys,
        };

        let mut plan = WritePlan::new("update_user");
        plan.extend(
            updated
                .access_keys
                .keys()
                .filter(|token| !current.has_access_key(token))
                .map(|token| IndexManager::access_key_step(token, &updated.id)),
        );
        let mut previous = current.encode()?;
        set_row_version(&mut previous, version);
        plan.push(WriteStep::replace(
            User::TABLE,
            updated.row_key(),
            updated.encode()?,
            previous,
        ));
        plan.extend(
            current
                .access_keys
                .keys()
                .filter(|token| !updated.has_access_key(token))
                .map(|token| IndexManager::access_key_release_step(token)),
        );
        plan.execute(self.store.as_ref()).await?;

        tracing::info!(user_id = %updated.id, "User updated");
        Ok(updated)
    }
}
