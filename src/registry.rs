//! Proxy registry
//!
//! Owns every running [`ProxyInstance`] and tracks which one is selected.
//! Whenever at least one instance exists exactly one is selected; when the
//! selected instance is killed, the most recently created survivor takes its
//! place, and killing the last one leaves the registry explicitly empty.
//!
//! Names are case-sensitive, 1 to 32 characters of `[A-Za-z0-9_-]`, and may
//! not start with a digit, so a numeric argument always means a local port.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use crate::common::{ProxyError, Result};
use crate::console::Console;
use crate::module::{self, Module};
use crate::proxy::{ProxyInstance, ProxySettings, ProxySummary};
use crate::store::VariableStore;

/// Longest accepted proxy name
pub const MAX_NAME_LEN: usize = 32;

/// Check a proxy name against the naming rules
pub fn validate_proxy_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| ProxyError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(invalid("must be 1 to 32 characters long"));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid("must not start with a digit"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(invalid("may only contain letters, digits, '_' and '-'"));
    }
    Ok(())
}

/// One listing row
#[derive(Debug, Clone)]
pub struct ListEntry {
    /// Instance snapshot
    pub summary: ProxySummary,
    /// Whether this is the selected instance
    pub selected: bool,
}

/// The set of running proxies
#[derive(Debug)]
pub struct ProxyRegistry {
    /// Instances in creation order
    instances: Vec<ProxyInstance>,
    /// Index into `instances`
    selected: Option<usize>,
    store: Arc<VariableStore>,
    console: Console,
    settings: ProxySettings,
    default_module: Option<PathBuf>,
}

impl ProxyRegistry {
    /// Create an empty registry
    ///
    /// # Parameters
    ///
    /// * `store` - Variable store handed to every instance
    /// * `console` - Console handed to every instance
    /// * `settings` - Socket settings for new instances
    /// * `default_module` - Module file for new instances; the built-in
    ///   passthrough module is used when `None`
    pub fn new(
        store: Arc<VariableStore>,
        console: Console,
        settings: ProxySettings,
        default_module: Option<PathBuf>,
    ) -> Self {
        Self {
            instances: Vec::new(),
            selected: None,
            store,
            console,
            settings,
            default_module,
        }
    }

    /// Shared variable store
    pub fn store(&self) -> &Arc<VariableStore> {
        &self.store
    }

    /// Console used by the instances
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Bind address of new instances
    pub fn bind_ip(&self) -> IpAddr {
        self.settings.bind_ip
    }

    /// Create and select a new instance
    ///
    /// Fails with [`ProxyError::NameCollision`] before any socket work, and
    /// with [`ProxyError::Bind`] when the port belongs to another instance or
    /// cannot be bound.
    pub fn create(&mut self, name: &str, local_port: u16, remote_host: &str, remote_port: u16) -> Result<&ProxyInstance> {
        validate_proxy_name(name)?;
        if self.position(name).is_some() {
            return Err(ProxyError::NameCollision(name.to_string()));
        }
        if local_port != 0 {
            if let Some(owner) = self.instances.iter().find(|i| i.local_port() == local_port) {
                return Err(ProxyError::Bind {
                    port: local_port,
                    reason: format!("already used by proxy '{}'", owner.name()),
                });
            }
        }

        let module = match &self.default_module {
            Some(path) => module::load(path)?,
            None => Module::passthrough(),
        };
        let instance = ProxyInstance::start(
            name,
            local_port,
            remote_host,
            remote_port,
            module,
            Arc::clone(&self.store),
            self.console.clone(),
            self.settings.clone(),
        )?;

        self.instances.push(instance);
        let index = self.instances.len() - 1;
        self.selected = Some(index);
        Ok(&self.instances[index])
    }

    /// Stop and remove an instance, the selected one when `name` is `None`
    ///
    /// # Returns
    ///
    /// The name of the killed instance
    pub async fn kill(&mut self, name: Option<&str>) -> Result<String> {
        let index = match name {
            Some(name) => self.resolve(name)?,
            None => self.selected.ok_or(ProxyError::NoActiveProxy)?,
        };

        let instance = self.instances.remove(index);
        let killed = instance.name();
        self.selected = match self.selected {
            _ if self.instances.is_empty() => None,
            Some(selected) if selected == index => Some(self.instances.len() - 1),
            Some(selected) if selected > index => Some(selected - 1),
            other => other,
        };

        instance.stop().await;
        info!(
            "Killed proxy '{}', selected: {}",
            killed,
            self.selected().map(|i| i.name()).unwrap_or_else(|| "none".to_string())
        );
        Ok(killed)
    }

    /// Stop every instance
    pub async fn kill_all(&mut self) {
        self.selected = None;
        for instance in self.instances.drain(..).rev() {
            instance.stop().await;
        }
    }

    /// Select an instance by name or local port
    pub fn select(&mut self, target: &str) -> Result<&ProxyInstance> {
        let index = self.resolve(target)?;
        self.selected = Some(index);
        Ok(&self.instances[index])
    }

    /// Rename the selected instance
    ///
    /// # Returns
    ///
    /// The previous name
    pub fn rename(&mut self, new_name: &str) -> Result<String> {
        validate_proxy_name(new_name)?;
        let index = self.selected.ok_or(ProxyError::NoActiveProxy)?;
        let old_name = self.instances[index].name();
        if old_name == new_name {
            return Ok(old_name);
        }
        if self.position(new_name).is_some() {
            return Err(ProxyError::NameCollision(new_name.to_string()));
        }
        self.instances[index].rename(new_name);
        Ok(old_name)
    }

    /// Listing rows in creation order
    pub fn list(&self) -> Vec<ListEntry> {
        self.instances
            .iter()
            .enumerate()
            .map(|(index, instance)| ListEntry {
                summary: instance.summary(),
                selected: self.selected == Some(index),
            })
            .collect()
    }

    /// The selected instance, if any
    pub fn selected(&self) -> Option<&ProxyInstance> {
        self.selected.and_then(|index| self.instances.get(index))
    }

    /// The selected instance, or [`ProxyError::NoActiveProxy`]
    pub fn active(&self) -> Result<&ProxyInstance> {
        self.selected().ok_or(ProxyError::NoActiveProxy)
    }

    /// Look up an instance by name
    pub fn get(&self, name: &str) -> Option<&ProxyInstance> {
        self.position(name).map(|index| &self.instances[index])
    }

    /// Look up an instance by local port
    pub fn by_port(&self, port: u16) -> Option<&ProxyInstance> {
        self.instances.iter().find(|i| i.local_port() == port)
    }

    /// Instance addressed by name or local port, the selected one for `None`
    pub fn target(&self, name: Option<&str>) -> Result<&ProxyInstance> {
        match name {
            Some(name) => self.resolve(name).map(|index| &self.instances[index]),
            None => self.active(),
        }
    }

    /// All instances in creation order
    pub fn instances(&self) -> impl Iterator<Item = &ProxyInstance> {
        self.instances.iter()
    }

    /// Number of instances
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the registry is in the empty state
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.instances.iter().position(|i| i.name() == name)
    }

    fn resolve(&self, target: &str) -> Result<usize> {
        if self.instances.is_empty() {
            return Err(ProxyError::NoActiveProxy);
        }
        if let Some(index) = self.position(target) {
            return Ok(index);
        }
        if target.starts_with(|c: char| c.is_ascii_digit()) {
            if let Ok(port) = target.parse::<u16>() {
                if let Some(index) = self.instances.iter().position(|i| i.local_port() == port) {
                    return Ok(index);
                }
            }
        }
        Err(ProxyError::UnknownProxy(target.to_string()))
    }
}
