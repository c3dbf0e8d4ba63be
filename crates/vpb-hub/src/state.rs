//! The Hub's single coarse-grained unit of state, guarded by one lock in
//! [`crate::Hub`].

use std::collections::HashMap;
use std::sync::Arc;

use vpb_core::{Access, AreaId, PropertyConfig, PropertyId, RateInfo};

use crate::service::{ServiceId, ServiceRef};

#[derive(Default)]
pub(crate) struct HubState {
    pub(crate) all_properties: HashMap<PropertyId, PropertyConfig>,
    pub(crate) access_by_propid_areaid: HashMap<(PropertyId, AreaId), Access>,
    pub(crate) property_handlers: HashMap<PropertyId, ServiceId>,
    pub(crate) rate_info: HashMap<(PropertyId, AreaId), RateInfo>,
    services: Vec<Arc<dyn ServiceRef>>,
}

impl HubState {
    pub(crate) fn register_service(&mut self, service: Arc<dyn ServiceRef>) -> ServiceId {
        let id = ServiceId(self.services.len());
        self.services.push(service);
        id
    }

    pub(crate) fn populate_properties(&mut self, configs: Vec<PropertyConfig>) {
        for mut config in configs {
            for area in &mut config.area_configs {
                if matches!(area.access, Access::None) {
                    area.access = config.access;
                }
            }
            for area_id in config.area_ids() {
                let access = config.effective_access(area_id);
                self.access_by_propid_areaid
                    .insert((config.prop_id, area_id), access);
            }
            self.all_properties.insert(config.prop_id, config);
        }
    }

    /// Offers every registered service, in order, either its declared
    /// supported-property list or the remaining unclaimed properties. The
    /// first service to claim a propId wins; later claims are silently
    /// ignored.
    pub(crate) fn assign_ownership(&mut self) {
        let all_prop_ids: Vec<PropertyId> = self.all_properties.keys().copied().collect();
        for (index, service) in self.services.iter().enumerate() {
            let declared = service.supported_properties();
            let candidates = if declared.is_empty() {
                all_prop_ids.clone()
            } else {
                declared
            };
            for prop_id in candidates {
                if !self.all_properties.contains_key(&prop_id) {
                    continue;
                }
                self.property_handlers
                    .entry(prop_id)
                    .or_insert(ServiceId(index));
            }
        }
    }

    pub(crate) fn init_services(&self) {
        for (index, service) in self.services.iter().enumerate() {
            let owned: Vec<PropertyConfig> = self
                .property_handlers
                .iter()
                .filter(|(_, owner)| owner.0 == index)
                .filter_map(|(prop_id, _)| self.all_properties.get(prop_id).cloned())
                .collect();
            service.take_properties(&owned);
            service.init();
        }
    }

    pub(crate) fn owning_service(&self, prop_id: PropertyId) -> Option<ServiceId> {
        self.property_handlers.get(&prop_id).copied()
    }

    pub(crate) fn service_at(&self, id: ServiceId) -> Option<Arc<dyn ServiceRef>> {
        self.services.get(id.0).cloned()
    }

    pub(crate) fn clear(&mut self) {
        self.all_properties.clear();
        self.access_by_propid_areaid.clear();
        self.property_handlers.clear();
        self.rate_info.clear();
        self.services.clear();
    }
}
