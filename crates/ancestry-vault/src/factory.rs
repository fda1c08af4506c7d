//! Vault factory
//!
//! Produces independent [`VaultEngine`] instances. Each gets a fresh address
//! derived from the factory address and a nonce, and its creator as
//! `DefaultAdmin`. The factory's own registry only governs the factory.

use crate::engine::VaultEngine;
use crate::events::FactoryEvent;
use crate::record::{InheritanceCondition, VaultId};
use crate::VaultError;
use ancestry_core::{AccessControl, Address, Clock, Role, VaultParams};
use ancestry_ledger::Ledger;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Inputs for a new vault. `beneficiaries` and `shares` are parallel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVaultRequest {
    pub beneficiaries: Vec<Address>,
    pub shares: Vec<u16>,
    #[serde(default)]
    pub metadata_uri: String,
    #[serde(default)]
    pub conditions: Vec<InheritanceCondition>,
    #[serde(default)]
    pub sacrificial_share: u16,
}

/// Acknowledgement of a created vault.
#[derive(Clone)]
pub struct VaultCreated {
    pub vault_id: VaultId,
    pub proxy_address: Address,
    pub engine: Rc<VaultEngine>,
}

#[derive(Default)]
struct FactoryState {
    nonce: u64,
    vaults: Vec<Rc<VaultEngine>>,
    by_user: BTreeMap<Address, Vec<usize>>,
    events: Vec<FactoryEvent>,
}

pub struct VaultFactory {
    address: Address,
    clock: Rc<dyn Clock>,
    params: RefCell<VaultParams>,
    roles: RefCell<AccessControl>,
    state: RefCell<FactoryState>,
}

impl VaultFactory {
    pub fn new(
        address: Address,
        admin: Address,
        params: VaultParams,
        clock: Rc<dyn Clock>,
    ) -> Result<Self, VaultError> {
        params.validate()?;
        Ok(Self {
            address,
            clock,
            params: RefCell::new(params),
            roles: RefCell::new(AccessControl::with_admin(admin, &[])),
            state: RefCell::new(FactoryState::default()),
        })
    }

    /// Build a new engine for `caller` on `ledger` and create its first vault.
    ///
    /// Anyone may call this. A rejected request consumes no nonce.
    pub fn create_vault(
        &self,
        caller: Address,
        ledger: &Rc<Ledger>,
        request: CreateVaultRequest,
    ) -> Result<VaultCreated, VaultError> {
        if request.beneficiaries.len() != request.shares.len() {
            return Err(VaultError::LengthMismatch {
                beneficiaries: request.beneficiaries.len(),
                shares: request.shares.len(),
            });
        }

        let nonce = self.state.borrow().nonce;
        let proxy_address = Address::derive(&self.address, nonce);
        let params = self.params.borrow().clone();
        let engine = Rc::new(VaultEngine::new(
            proxy_address,
            ledger.clone(),
            self.clock.clone(),
            caller,
            params,
        )?);
        let vault_id = engine.create_vault(
            caller,
            &request.beneficiaries,
            &request.shares,
            request.metadata_uri,
            &request.conditions,
            request.sacrificial_share,
        )?;

        let mut state = self.state.borrow_mut();
        state.nonce += 1;
        let index = state.vaults.len();
        state.vaults.push(engine.clone());
        state.by_user.entry(caller).or_default().push(index);
        state.events.push(FactoryEvent::VaultProxyCreated {
            creator: caller,
            proxy: proxy_address,
            vault_id,
        });

        log::info!("Factory {} created vault proxy {} for {}", self.address, proxy_address, caller);

        Ok(VaultCreated {
            vault_id,
            proxy_address,
            engine,
        })
    }

    /// Replace the parameters given to engines created from now on.
    pub fn set_vault_params(&self, caller: Address, params: VaultParams) -> Result<(), VaultError> {
        self.roles.borrow().check_role(Role::DefaultAdmin, &caller)?;
        params.validate()?;
        *self.params.borrow_mut() = params;
        Ok(())
    }

    pub fn grant_role(&self, caller: Address, role: Role, account: Address) -> Result<(), VaultError> {
        self.roles.borrow_mut().grant_role(&caller, role, account)?;
        Ok(())
    }

    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        self.roles.borrow().has_role(role, account)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn vault_params(&self) -> VaultParams {
        self.params.borrow().clone()
    }

    pub fn vault_count(&self) -> usize {
        self.state.borrow().vaults.len()
    }

    pub fn vault(&self, index: usize) -> Option<Rc<VaultEngine>> {
        self.state.borrow().vaults.get(index).cloned()
    }

    pub fn user_vault_count(&self, user: &Address) -> usize {
        self.state
            .borrow()
            .by_user
            .get(user)
            .map_or(0, |v| v.len())
    }

    /// Engines created by `user`, oldest first.
    pub fn user_vaults(&self, user: &Address) -> Vec<Rc<VaultEngine>> {
        let state = self.state.borrow();
        state
            .by_user
            .get(user)
            .map(|indices| indices.iter().map(|i| state.vaults[*i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<FactoryEvent> {
        self.state.borrow().events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VaultStatus;
    use crate::test_utils::*;
    use ancestry_core::PerMille;

    fn factory(w: &World) -> VaultFactory {
        VaultFactory::new(
            Address::from_label("factory"),
            admin(),
            VaultParams::default(),
            w.clock.clone() as Rc<dyn Clock>,
        )
        .unwrap()
    }

    fn request() -> CreateVaultRequest {
        CreateVaultRequest {
            beneficiaries: vec![heir_a(), heir_b()],
            shares: vec![700, 100],
            metadata_uri: "ipfs://test".into(),
            conditions: vec![InheritanceCondition::time(START - 100)],
            sacrificial_share: 200,
        }
    }

    #[test]
    fn test_creator_is_vault_admin() {
        let w = world();
        let factory = factory(&w);

        let created = factory.create_vault(creator(), &w.ledger, request()).unwrap();

        assert_eq!(created.vault_id, 0);
        assert!(created.engine.has_role(Role::DefaultAdmin, &creator()));
        assert!(!created.engine.has_role(Role::DefaultAdmin, &admin()));
        assert!(factory.has_role(Role::DefaultAdmin, &admin()));
        assert_eq!(created.engine.address(), created.proxy_address);
        assert_eq!(
            created.engine.sacrificial_share(0).unwrap(),
            PerMille::new(200).unwrap()
        );
        assert_eq!(created.engine.status(0).unwrap(), VaultStatus::Active);
    }

    #[test]
    fn test_each_vault_gets_fresh_address() {
        let w = world();
        let factory = factory(&w);

        let first = factory.create_vault(creator(), &w.ledger, request()).unwrap();
        let second = factory
            .create_vault(heir_a(), &w.ledger, CreateVaultRequest {
                beneficiaries: vec![heir_b()],
                shares: vec![1000],
                ..CreateVaultRequest::default()
            })
            .unwrap();

        assert_ne!(first.proxy_address, second.proxy_address);
        assert_eq!(factory.vault_count(), 2);
        assert_eq!(factory.user_vault_count(&creator()), 1);
        assert_eq!(factory.user_vault_count(&heir_a()), 1);
        assert_eq!(factory.user_vault_count(&stranger()), 0);
        assert_eq!(
            factory.user_vaults(&heir_a())[0].address(),
            second.proxy_address
        );
        assert!(factory.vault(1).is_some());
        assert!(factory.vault(2).is_none());
        assert_eq!(factory.events().len(), 2);
    }

    #[test]
    fn test_rejected_request_leaves_no_trace() {
        let w = world();
        let factory = factory(&w);

        assert!(matches!(
            factory.create_vault(creator(), &w.ledger, CreateVaultRequest {
                beneficiaries: vec![heir_a()],
                shares: vec![900],
                sacrificial_share: 200,
                ..CreateVaultRequest::default()
            }),
            Err(VaultError::TotalSharesMismatch { total: 1100 })
        ));

        assert!(matches!(
            factory.create_vault(creator(), &w.ledger, CreateVaultRequest {
                beneficiaries: vec![heir_a(), heir_b()],
                shares: vec![1000],
                ..CreateVaultRequest::default()
            }),
            Err(VaultError::LengthMismatch { .. })
        ));

        assert_eq!(factory.vault_count(), 0);
        // The next success still uses nonce 0
        let created = factory.create_vault(creator(), &w.ledger, request()).unwrap();
        assert_eq!(
            created.proxy_address,
            Address::derive(&factory.address(), 0)
        );
    }

    #[test]
    fn test_set_vault_params_admin_only() {
        let w = world();
        let factory = factory(&w);
        let params = VaultParams {
            max_conditions: 2,
            ..VaultParams::default()
        };

        assert!(matches!(
            factory.set_vault_params(creator(), params.clone()),
            Err(VaultError::Access(_))
        ));
        factory.set_vault_params(admin(), params).unwrap();

        let created = factory.create_vault(creator(), &w.ledger, request()).unwrap();
        assert_eq!(created.engine.params().max_conditions, 2);
    }
}
