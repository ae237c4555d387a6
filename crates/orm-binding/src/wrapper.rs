//! Entity Wrapper
//!
//! Adapts one property bag (and optionally the plain object behind it) to a
//! uniform property surface for binding consumers.
//!
//! Writes made through the wrapper raise exactly one `PropertyChanged`.
//! While the wrapper is writing, notifications the wrapped object raises on
//! its own are not forwarded, so they cannot echo back through the
//! wrapper's public events. Notifications the object raises for changes made
//! elsewhere are forwarded as they arrive.
//!
//! State reads run with the service scope that was ambient when the wrapper
//! was built, regardless of the scope active on the calling thread.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

use tracked_orm::bag::BagNotification;
use tracked_orm::value::coerce;
use tracked_orm::{
    DirtyStateChangeEvent, EntityId, EventSource, FieldDefinition, FieldType, MetadataRegistry,
    ObjectState, OrmError, OrmResult, PropertyBag, PropertyChangedEvent, RowSnapshot, ServiceScope,
    SubscriptionId, Value,
};

use crate::descriptor::{self, PropertyDescriptor};
use crate::object::{Capabilities, EntityObject};
use crate::validation::RegistryValidator;

struct Signals {
    signalling: AtomicUsize,
    property_changed: EventSource<PropertyChangedEvent>,
    dirty_state_changed: EventSource<DirtyStateChangeEvent>,
}

impl Signals {
    fn is_signalling(&self) -> bool {
        self.signalling.load(Ordering::Acquire) > 0
    }
}

/// Suppresses forwarding of object notifications while held
struct Signalling<'a>(&'a AtomicUsize);

impl<'a> Signalling<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Signalling(counter)
    }
}

impl Drop for Signalling<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Forwarded {
    PropertyChanged(SubscriptionId),
    DirtyState(SubscriptionId),
}

pub struct EntityWrapper {
    id: EntityId,
    entity_type: String,
    scope: ServiceScope,
    bag: RwLock<Option<PropertyBag>>,
    object: Option<Weak<dyn EntityObject>>,
    declared: Vec<FieldDefinition>,
    capabilities: Capabilities,
    declared_originals: Mutex<HashMap<String, Value>>,
    validator: Option<RegistryValidator>,
    signals: Arc<Signals>,
    forwarded: Mutex<Vec<Forwarded>>,
    disposed: AtomicBool,
}

impl EntityWrapper {
    pub fn builder(entity_type: impl Into<String>) -> WrapperBuilder {
        WrapperBuilder::new(entity_type)
    }

    /// Wrap a bag with no backing object, tracked in the ambient scope
    pub fn new(entity_type: impl Into<String>, bag: PropertyBag) -> Self {
        Self::builder(entity_type).bag(bag).build()
    }

    /// Wrap an object and its bag, tracked in the ambient scope
    pub fn wrap<T>(object: &Arc<T>, bag: PropertyBag) -> Self
    where
        T: EntityObject + 'static,
    {
        Self::builder(object.type_name()).object(object).bag(bag).build()
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// The scope captured at construction
    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The wrapped object, if it is still alive
    pub fn object(&self) -> Option<Arc<dyn EntityObject>> {
        self.object.as_ref().and_then(Weak::upgrade)
    }

    pub fn property_changed(&self) -> &EventSource<PropertyChangedEvent> {
        &self.signals.property_changed
    }

    pub fn dirty_state_changed(&self) -> &EventSource<DirtyStateChangeEvent> {
        &self.signals.dirty_state_changed
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Run `f` with the construction-time scope ambient on this thread
    pub fn in_scope<R>(&self, f: impl FnOnce(&ServiceScope) -> R) -> R {
        ServiceScope::with_scope(&self.scope, || f(&ServiceScope::ambient()))
    }

    pub fn state(&self) -> ObjectState {
        self.in_scope(|scope| scope.state_of(self.id))
    }

    pub fn set_state(&self, state: ObjectState) {
        self.in_scope(|scope| scope.set_state(self.id, state));
    }

    fn declared_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.declared.iter().find(|field| field.name == name)
    }

    /// The live object, when `name` is one of its declared fields
    fn declared_object(&self, name: &str) -> Option<(Arc<dyn EntityObject>, FieldType)> {
        let field_type = self.declared_field(name)?.field_type;
        self.object().map(|object| (object, field_type))
    }

    fn disposed_error(&self) -> OrmError {
        OrmError::Disposed(format!("entity wrapper for '{}'", self.entity_type))
    }

    fn not_found(&self, name: &str) -> OrmError {
        OrmError::property_not_found(name, self.entity_type.clone())
    }

    fn ensure_live(&self) -> OrmResult<()> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        Ok(())
    }

    pub fn get_property_value(&self, name: &str) -> OrmResult<Value> {
        self.ensure_live()?;

        if let Some((object, _)) = self.declared_object(name) {
            return object.get_field(name).ok_or_else(|| self.not_found(name));
        }

        {
            let bag = self.bag.read();
            let bag = bag.as_ref().ok_or_else(|| self.disposed_error())?;
            if let Some(value) = bag.peek_value(name) {
                return Ok(value.clone());
            }
            if !bag.is_auto_creating() {
                return Err(self.not_found(name));
            }
        }

        let mut bag = self.bag.write();
        let bag = bag.as_mut().ok_or_else(|| self.disposed_error())?;
        let value = bag.get_value(name)?;
        bag.take_notifications();
        Ok(value)
    }

    /// Write a property, returning whether its value changed
    pub fn set_property_value(&self, name: &str, value: Value) -> OrmResult<bool> {
        self.ensure_live()?;

        let (changed, notifications) = {
            let _signalling = Signalling::enter(&self.signals.signalling);

            match self.declared_object(name) {
                Some((object, field_type)) => {
                    let value = coerce(name, value, &field_type)?;
                    let previous = object.get_field(name);
                    let changed = object.set_field(name, value)?;
                    if changed {
                        if let Some(previous) = previous {
                            self.declared_originals
                                .lock()
                                .entry(name.to_string())
                                .or_insert(previous);
                        }
                    }
                    (changed, vec![BagNotification::PropertyChanged(name.to_string())])
                }
                None => {
                    let mut bag = self.bag.write();
                    let bag = bag.as_mut().ok_or_else(|| self.disposed_error())?;
                    if !bag.has_field(name) && !bag.is_auto_creating() {
                        return Err(self.not_found(name));
                    }
                    let changed = bag.set_value(name, value)?;
                    (changed, bag.take_notifications())
                }
            }
        };

        if changed {
            self.scope.mark_written(self.id);
            self.raise(notifications);
        }
        Ok(changed)
    }

    pub fn get(&self, name: &str) -> OrmResult<Value> {
        self.get_property_value(name)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> OrmResult<bool> {
        self.set_property_value(name, value.into())
    }

    /// Properties cannot be added through the wrapper; add them to the bag instead
    pub fn add_property(&self, name: &str, _field_type: FieldType) -> OrmResult<()> {
        Err(OrmError::NotSupported(format!(
            "cannot add property '{}' through the wrapper for '{}'",
            name, self.entity_type
        )))
    }

    pub fn is_property_dirty(&self, name: &str) -> bool {
        if let Some((object, _)) = self.declared_object(name) {
            return match self.declared_originals.lock().get(name) {
                Some(original) => object.get_field(name).as_ref() != Some(original),
                None => false,
            };
        }

        self.bag
            .read()
            .as_ref()
            .map(|bag| bag.is_field_dirty(name))
            .unwrap_or(false)
    }

    pub fn is_dirty(&self) -> bool {
        let bag_dirty = self.bag.read().as_ref().map(PropertyBag::is_dirty).unwrap_or(false);
        bag_dirty || self.declared.iter().any(|field| self.is_property_dirty(&field.name))
    }

    /// Restore one property to its original value
    pub fn reset_property(&self, name: &str) -> OrmResult<bool> {
        self.ensure_live()?;

        if self.declared_object(name).is_some() {
            let original = self.declared_originals.lock().get(name).cloned();
            return match original {
                Some(original) => {
                    let changed = self.set_property_value(name, original)?;
                    self.declared_originals.lock().remove(name);
                    Ok(changed)
                }
                None => Ok(false),
            };
        }

        let original = {
            let bag = self.bag.read();
            let bag = bag.as_ref().ok_or_else(|| self.disposed_error())?;
            if !bag.has_field(name) {
                return Err(self.not_found(name));
            }
            bag.get_original_value(name, true)?
        };
        self.set_property_value(name, original)
    }

    /// Accept boundary for the whole entity
    pub fn accept_changes(&self) -> OrmResult<()> {
        self.ensure_live()?;

        let notifications = {
            let mut bag = self.bag.write();
            let bag = bag.as_mut().ok_or_else(|| self.disposed_error())?;
            bag.accept_changes();
            bag.take_notifications()
        };
        self.declared_originals.lock().clear();

        let state = self.in_scope(|scope| scope.mark_accepted(self.id));
        debug!(entity = %self.id, entity_type = %self.entity_type, %state, "changes accepted");
        self.raise(notifications);
        Ok(())
    }

    /// Restore every property to its original value
    pub fn reject_changes(&self) -> OrmResult<()> {
        self.ensure_live()?;

        let mut first_error = None;
        let mut notifications = {
            let _signalling = Signalling::enter(&self.signals.signalling);

            let mut notifications = {
                let mut bag = self.bag.write();
                let bag = bag.as_mut().ok_or_else(|| self.disposed_error())?;
                bag.reject_changes();
                bag.take_notifications()
            };

            let originals = std::mem::take(&mut *self.declared_originals.lock());
            if let Some(object) = self.object() {
                for (name, original) in originals {
                    match object.set_field(&name, original) {
                        Ok(true) => notifications.push(BagNotification::PropertyChanged(name)),
                        Ok(false) => {}
                        Err(e) => {
                            warn!(entity = %self.id, field = %name, error = %e, "failed to restore declared field");
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
            notifications
        };

        if self.state() == ObjectState::Modified {
            self.set_state(ObjectState::Unchanged);
        }
        notifications.sort_by_key(|n| matches!(n, BagNotification::DirtyStateChanged { .. }));
        self.raise(notifications);
        first_error.map_or(Ok(()), Err)
    }

    /// The merged property surface
    pub fn properties(&self) -> Vec<PropertyDescriptor> {
        let bag_fields: Vec<(String, FieldType)> = self
            .bag
            .read()
            .as_ref()
            .map(|bag| {
                bag.field_names()
                    .into_iter()
                    .filter_map(|name| bag.field_type(&name).map(|field_type| (name, field_type)))
                    .collect()
            })
            .unwrap_or_default();

        let declared: &[FieldDefinition] = if self.object().is_some() {
            &self.declared
        } else {
            &[]
        };
        descriptor::merge(declared, bag_fields)
    }

    pub fn property(&self, name: &str) -> Option<PropertyDescriptor> {
        self.properties().into_iter().find(|d| d.name() == name)
    }

    /// Whole-object validation error
    pub fn data_error(&self) -> Option<String> {
        self.in_scope(|_| {
            if self.capabilities.error_info {
                let object_error = self
                    .object()
                    .and_then(|object| object.error_info().and_then(|info| info.error()));
                if object_error.is_some() {
                    return object_error;
                }
            }

            let validator = self.validator.as_ref()?;
            let values = self.current_values();
            validator.object_error(values.iter().map(|(name, value)| (name.as_str(), value)))
        })
    }

    /// Validation error for one field
    pub fn field_error(&self, name: &str) -> Option<String> {
        self.in_scope(|_| {
            if self.capabilities.error_info {
                let object_error = self
                    .object()
                    .and_then(|object| object.error_info().and_then(|info| info.field_error(name)));
                if object_error.is_some() {
                    return object_error;
                }
            }

            let validator = self.validator.as_ref()?;
            let value = self.get_property_value(name).ok()?;
            validator.field_error(name, &value)
        })
    }

    fn current_values(&self) -> Vec<(String, Value)> {
        let mut values: Vec<(String, Value)> = Vec::new();
        if let Some(object) = self.object() {
            for field in &self.declared {
                if let Some(value) = object.get_field(&field.name) {
                    values.push((field.name.clone(), value));
                }
            }
        }
        if let Some(bag) = self.bag.read().as_ref() {
            for (name, value) in bag.all_values() {
                if self.declared_field(&name).is_none() {
                    values.push((name, value));
                }
            }
        }
        values
    }

    fn raise(&self, notifications: Vec<BagNotification>) {
        for notification in notifications {
            match notification {
                BagNotification::PropertyChanged(name) => {
                    self.signals.property_changed.emit(&PropertyChangedEvent::new(name))
                }
                BagNotification::DirtyStateChanged { was_dirty, is_dirty } => self
                    .signals
                    .dirty_state_changed
                    .emit(&DirtyStateChangeEvent { was_dirty, is_dirty }),
            }
        }
    }

    /// Unsubscribe forwarded handlers and release the bag. Repeated calls are no-ops.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let forwarded = std::mem::take(&mut *self.forwarded.lock());
        if let Some(object) = self.object() {
            for subscription in forwarded {
                match subscription {
                    Forwarded::PropertyChanged(id) => {
                        if let Some(source) = object.property_changed() {
                            source.unsubscribe(id);
                        }
                    }
                    Forwarded::DirtyState(id) => {
                        if let Some(source) = object.dirty_state_changed() {
                            source.unsubscribe(id);
                        }
                    }
                }
            }
        }

        self.bag.write().take();
        debug!(entity = %self.id, entity_type = %self.entity_type, "entity wrapper disposed");
    }
}

impl Drop for EntityWrapper {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl RowSnapshot for EntityWrapper {
    fn entity_type(&self) -> String {
        self.entity_type.clone()
    }

    fn state(&self) -> ObjectState {
        EntityWrapper::state(self)
    }

    fn value(&self, field: &str) -> Option<Value> {
        self.get_property_value(field).ok()
    }
}

impl std::fmt::Debug for EntityWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityWrapper")
            .field("id", &self.id)
            .field("entity_type", &self.entity_type)
            .field("scope", &self.scope.id())
            .field("capabilities", &self.capabilities)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Builder for [`EntityWrapper`]
pub struct WrapperBuilder {
    entity_type: String,
    bag: PropertyBag,
    object: Option<Arc<dyn EntityObject>>,
    scope: Option<ServiceScope>,
    registry: Option<Arc<MetadataRegistry>>,
    initial_state: ObjectState,
}

impl WrapperBuilder {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            bag: PropertyBag::new(),
            object: None,
            scope: None,
            registry: None,
            initial_state: ObjectState::Added,
        }
    }

    pub fn bag(mut self, bag: PropertyBag) -> Self {
        self.bag = bag;
        self
    }

    /// Back-reference to the plain object; the wrapper never keeps it alive
    pub fn object<T>(mut self, object: &Arc<T>) -> Self
    where
        T: EntityObject + 'static,
    {
        let object: Arc<dyn EntityObject> = object.clone();
        self.object = Some(object);
        self
    }

    /// Track in this scope instead of the ambient one
    pub fn scope(mut self, scope: &ServiceScope) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    /// Seed registered defaults and validate against registered constraints
    pub fn registry(mut self, registry: Arc<MetadataRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn state(mut self, state: ObjectState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn build(self) -> EntityWrapper {
        let WrapperBuilder {
            entity_type,
            mut bag,
            object,
            scope,
            registry,
            initial_state,
        } = self;

        let scope = scope.unwrap_or_else(ServiceScope::ambient);
        let (declared, capabilities) = match &object {
            Some(object) => (object.declared_fields(), Capabilities::probe(object.as_ref())),
            None => (Vec::new(), Capabilities::default()),
        };

        if let Some(registry) = &registry {
            seed_defaults(&mut bag, registry, &entity_type, &declared);
        }
        bag.take_notifications();

        let signals = Arc::new(Signals {
            signalling: AtomicUsize::new(0),
            property_changed: EventSource::new(),
            dirty_state_changed: EventSource::new(),
        });

        let mut forwarded = Vec::new();
        if let Some(object) = &object {
            if let Some(source) = object.property_changed() {
                let signals = Arc::clone(&signals);
                let id = source.subscribe(move |event: &PropertyChangedEvent| {
                    if !signals.is_signalling() {
                        signals.property_changed.emit(event);
                    }
                });
                forwarded.push(Forwarded::PropertyChanged(id));
            }
            if let Some(source) = object.dirty_state_changed() {
                let signals = Arc::clone(&signals);
                let id = source.subscribe(move |event: &DirtyStateChangeEvent| {
                    if !signals.is_signalling() {
                        signals.dirty_state_changed.emit(event);
                    }
                });
                forwarded.push(Forwarded::DirtyState(id));
            }
        }

        let id = Uuid::new_v4();
        scope.track(id, initial_state);

        let validator = registry.map(|registry| RegistryValidator::new(registry, entity_type.clone()));
        debug!(entity = %id, entity_type = %entity_type, scope = %scope.id(), ?capabilities, "entity wrapper created");

        EntityWrapper {
            id,
            entity_type,
            scope,
            bag: RwLock::new(Some(bag)),
            object: object.as_ref().map(Arc::downgrade),
            declared,
            capabilities,
            declared_originals: Mutex::new(HashMap::new()),
            validator,
            signals,
            forwarded: Mutex::new(forwarded),
            disposed: AtomicBool::new(false),
        }
    }
}

/// Registered defaults become the baseline of fields neither declared nor already in the bag
fn seed_defaults(bag: &mut PropertyBag, registry: &MetadataRegistry, entity_type: &str, declared: &[FieldDefinition]) {
    let was_clean = !bag.is_dirty();

    for (field, value) in registry.defaults.defaults_for(entity_type) {
        if bag.has_field(&field) || declared.iter().any(|d| d.name == field) {
            continue;
        }
        let field_type = FieldType::infer(&value);
        if let Err(e) = bag.set_value_typed(&field, value, field_type) {
            warn!(entity_type, field = %field, error = %e, "skipping registered default");
        }
    }

    if was_clean {
        bag.accept_changes();
    }
}
