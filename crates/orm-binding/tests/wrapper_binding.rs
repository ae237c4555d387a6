//! Entity wrappers seen from a binding consumer

use std::sync::{Arc, Mutex};
use std::thread;

use tracked_orm::{
    DirtyStateChangeEvent, EntityDefinition, EventSource, FieldDefinition, FieldType, MetadataRegistry,
    MetadataScanner, ObjectState, OrmError, OrmResult, PropertyBag, PropertyChangedEvent, RowPreview,
    RowSnapshot, SaveScopeConfig, ServiceScope, Value, ValueKind,
};
use tracked_orm_binding::{DataErrorInfo, EntityObject, EntityWrapper, PropertySource};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Customer {
    name: Mutex<Value>,
    secret: Mutex<Value>,
    changed: EventSource<PropertyChangedEvent>,
    dirty: EventSource<DirtyStateChangeEvent>,
}

impl Customer {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(Value::from(name)),
            secret: Mutex::new(Value::from("hunter2")),
            changed: EventSource::new(),
            dirty: EventSource::new(),
        })
    }

    fn slot(&self, name: &str) -> Option<&Mutex<Value>> {
        match name {
            "Name" => Some(&self.name),
            "Secret" => Some(&self.secret),
            _ => None,
        }
    }
}

impl EntityObject for Customer {
    fn type_name(&self) -> &str {
        "Customer"
    }

    fn declared_fields(&self) -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("Name", FieldType::new(ValueKind::String)),
            FieldDefinition::new("Secret", FieldType::new(ValueKind::String)).ignore_binding(),
        ]
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        self.slot(name).map(|slot| slot.lock().unwrap().clone())
    }

    fn set_field(&self, name: &str, value: Value) -> OrmResult<bool> {
        let slot = self
            .slot(name)
            .ok_or_else(|| OrmError::field_not_found(name))?;
        {
            let mut current = slot.lock().unwrap();
            if *current == value {
                return Ok(false);
            }
            *current = value;
        }
        self.changed.emit(&PropertyChangedEvent::new(name));
        self.dirty.emit(&DirtyStateChangeEvent {
            was_dirty: false,
            is_dirty: true,
        });
        Ok(true)
    }

    fn property_changed(&self) -> Option<&EventSource<PropertyChangedEvent>> {
        Some(&self.changed)
    }

    fn dirty_state_changed(&self) -> Option<&EventSource<DirtyStateChangeEvent>> {
        Some(&self.dirty)
    }

    fn error_info(&self) -> Option<&dyn DataErrorInfo> {
        Some(self)
    }
}

impl DataErrorInfo for Customer {
    fn error(&self) -> Option<String> {
        None
    }

    fn field_error(&self, field: &str) -> Option<String> {
        let empty = field == "Name" && self.name.lock().unwrap().as_str() == Some("");
        empty.then(|| "Name is required".to_string())
    }
}

type Seen = Arc<Mutex<Vec<String>>>;

fn watch(wrapper: &EntityWrapper) -> Seen {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let changes = Arc::clone(&seen);
    wrapper
        .property_changed()
        .subscribe(move |e| changes.lock().unwrap().push(e.property.clone()));
    let dirty = Arc::clone(&seen);
    wrapper.dirty_state_changed().subscribe(move |e| {
        dirty
            .lock()
            .unwrap()
            .push(format!("dirty:{}->{}", e.was_dirty, e.is_dirty))
    });
    seen
}

fn bag_with(values: &[(&str, Value)]) -> PropertyBag {
    let mut bag = PropertyBag::new();
    for (name, value) in values {
        bag.set_value(name, value.clone()).unwrap();
    }
    bag.accept_changes();
    bag.take_notifications();
    bag
}

#[test]
fn merged_surface_hides_ignored_and_shadowed_fields() {
    init_tracing();
    let customer = Customer::new("Ada");
    let bag = bag_with(&[("Name", Value::Int32(7)), ("Loyalty", Value::from("gold"))]);
    let wrapper = EntityWrapper::wrap(&customer, bag);

    let properties = wrapper.properties();
    let names: Vec<&str> = properties.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["Name", "Loyalty"]);
    assert_eq!(properties[0].source(), PropertySource::Declared);
    assert_eq!(properties[1].source(), PropertySource::Bag);

    assert_eq!(wrapper.get("Name").unwrap(), Value::from("Ada"));
    assert_eq!(wrapper.get("Loyalty").unwrap(), Value::from("gold"));

    let capabilities = wrapper.capabilities();
    assert!(capabilities.change_notification);
    assert!(capabilities.dirty_notification);
    assert!(capabilities.error_info);
}

#[test]
fn bag_write_notifies_exactly_once() {
    let wrapper = EntityWrapper::new("Note", bag_with(&[("Body", Value::from("draft"))]));
    let seen = watch(&wrapper);

    assert!(wrapper.set("Body", "final").unwrap());
    assert!(!wrapper.set("Body", "final").unwrap());

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["Body".to_string(), "dirty:false->true".to_string()]
    );
    assert!(wrapper.is_property_dirty("Body"));
}

#[test]
fn declared_write_suppresses_object_echo_but_forwards_external_changes() {
    let customer = Customer::new("Ada");
    let wrapper = EntityWrapper::wrap(&customer, PropertyBag::new());
    let seen = watch(&wrapper);

    assert!(wrapper.set("Name", "Grace").unwrap());
    assert_eq!(*seen.lock().unwrap(), vec!["Name".to_string()]);
    assert!(wrapper.is_property_dirty("Name"));

    seen.lock().unwrap().clear();
    customer.set_field("Name", Value::from("Hopper")).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["Name".to_string(), "dirty:false->true".to_string()]
    );
}

#[test]
fn state_reads_use_the_construction_scope() {
    let scope_a = ServiceScope::default();
    let scope_b = ServiceScope::default();

    let wrapper = ServiceScope::with_scope(&scope_a, || {
        EntityWrapper::new("Invoice", bag_with(&[("Total", Value::Float64(10.0))]))
    });
    assert!(wrapper.scope().is_same(&scope_a));
    assert_eq!(wrapper.state(), ObjectState::Added);

    wrapper.accept_changes().unwrap();
    assert_eq!(wrapper.state(), ObjectState::Unchanged);

    ServiceScope::with_scope(&scope_b, || {
        wrapper.set("Total", 12.5).unwrap();
        assert_eq!(wrapper.state(), ObjectState::Modified);
        assert_eq!(scope_b.state_of(wrapper.id()), ObjectState::Detached);
    });
    assert_eq!(scope_a.state_of(wrapper.id()), ObjectState::Modified);
}

#[test]
fn reject_changes_restores_values_and_state() {
    let customer = Customer::new("Ada");
    let wrapper = EntityWrapper::builder("Customer")
        .object(&customer)
        .bag(bag_with(&[("Loyalty", Value::from("gold"))]))
        .state(ObjectState::Unchanged)
        .build();

    wrapper.set("Name", "Grace").unwrap();
    wrapper.set("Loyalty", "silver").unwrap();
    assert!(wrapper.is_dirty());
    assert_eq!(wrapper.state(), ObjectState::Modified);

    wrapper.reject_changes().unwrap();
    assert!(!wrapper.is_dirty());
    assert_eq!(wrapper.get("Name").unwrap(), Value::from("Ada"));
    assert_eq!(wrapper.get("Loyalty").unwrap(), Value::from("gold"));
    assert_eq!(wrapper.state(), ObjectState::Unchanged);
}

#[test]
fn descriptor_reset_restores_original() {
    let wrapper = EntityWrapper::new("Note", bag_with(&[("Body", Value::from("alpha"))]));
    let body = wrapper.property("Body").unwrap();

    assert!(!body.can_reset_value(&wrapper));
    body.set_value(&wrapper, Value::from("beta")).unwrap();
    assert!(body.can_reset_value(&wrapper));
    assert_eq!(body.get_value(&wrapper).unwrap(), Value::from("beta"));

    assert!(body.reset_value(&wrapper).unwrap());
    assert_eq!(body.get_value(&wrapper).unwrap(), Value::from("alpha"));
    assert!(!body.can_reset_value(&wrapper));
}

#[test]
fn registry_defaults_seed_the_bag_and_drive_validation() {
    let registry = Arc::new(MetadataRegistry::new());
    MetadataScanner::new(&registry)
        .scan(&[EntityDefinition::new("Ticket")
            .primary_key(["TicketID"])
            .field(FieldDefinition::new("Code", FieldType::new(ValueKind::String)).max_length(5).default_value("NEW"))
            .field(FieldDefinition::new("Priority", FieldType::new(ValueKind::Int32)).default_value("3"))])
        .unwrap();

    let wrapper = EntityWrapper::builder("Ticket")
        .registry(Arc::clone(&registry))
        .build();

    assert_eq!(wrapper.get("Code").unwrap(), Value::from("NEW"));
    assert_eq!(wrapper.get("Priority").unwrap(), Value::Int32(3));
    assert!(!wrapper.is_dirty());
    assert!(wrapper.field_error("Code").is_none());
    assert!(wrapper.data_error().is_none());

    wrapper.set("Code", "TOO-LONG").unwrap();
    assert!(wrapper.field_error("Code").is_some());
    assert!(wrapper.data_error().is_some());
}

#[test]
fn object_error_info_takes_precedence() {
    let customer = Customer::new("Ada");
    let wrapper = EntityWrapper::wrap(&customer, PropertyBag::new());
    assert!(wrapper.field_error("Name").is_none());

    wrapper.set("Name", "").unwrap();
    assert_eq!(wrapper.field_error("Name").as_deref(), Some("Name is required"));
}

#[test]
fn nullable_field_accepts_null_and_non_nullable_rejects_it() {
    let mut bag = PropertyBag::new();
    bag.declare("Age", FieldType::nullable(ValueKind::Int32)).unwrap();
    bag.declare("Count", FieldType::new(ValueKind::Int32)).unwrap();
    let wrapper = EntityWrapper::new("Person", bag);

    assert!(wrapper.set("Age", 30).unwrap());
    assert!(wrapper.set("Age", Value::Null).unwrap());
    assert_eq!(wrapper.get("Age").unwrap(), Value::Null);

    assert!(matches!(
        wrapper.set("Count", Value::Null),
        Err(OrmError::TypeCoercion { .. })
    ));
    assert_eq!(wrapper.get("Count").unwrap(), Value::Int32(0));
}

#[test]
fn wrapper_feeds_the_row_save_preview() {
    let config = SaveScopeConfig::builder()
        .row_save_preview(|row: &dyn RowSnapshot| match row.value("Archived") {
            Some(Value::Bool(true)) => RowPreview::skip(),
            _ if row.state() == ObjectState::Added => RowPreview::treat_as(ObjectState::Modified),
            _ => RowPreview::save(),
        })
        .build()
        .unwrap();
    let preview = config.row_save_preview().unwrap();

    let archived = EntityWrapper::new("Doc", bag_with(&[("Archived", Value::Bool(true))]));
    let fresh = EntityWrapper::new("Doc", bag_with(&[("Archived", Value::Bool(false))]));

    assert_eq!(preview(&archived as &dyn RowSnapshot), RowPreview::skip());
    assert_eq!(preview(&fresh as &dyn RowSnapshot), RowPreview::treat_as(ObjectState::Modified));
    assert_eq!(RowSnapshot::entity_type(&fresh), "Doc");
}

#[test]
fn concurrent_writes_raise_one_notification_each() {
    let mut bag = PropertyBag::new();
    for i in 0..8 {
        bag.declare(&format!("F{}", i), FieldType::new(ValueKind::Int64)).unwrap();
    }
    let wrapper = Arc::new(EntityWrapper::new("Wide", bag));
    let seen = watch(&wrapper);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let wrapper = Arc::clone(&wrapper);
            thread::spawn(move || {
                for n in 1..=25i64 {
                    wrapper.set(&format!("F{}", i), n).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let seen = seen.lock().unwrap();
    let changes = seen.iter().filter(|e| !e.starts_with("dirty:")).count();
    assert_eq!(changes, 8 * 25);
    assert_eq!(seen.iter().filter(|e| *e == "dirty:false->true").count(), 1);
    assert_eq!(wrapper.get("F3").unwrap(), Value::Int64(25));
}

#[test]
fn dispose_releases_forwarding_and_rejects_access() {
    let customer = Customer::new("Ada");
    let wrapper = EntityWrapper::wrap(&customer, PropertyBag::new());
    assert_eq!(customer.changed.handler_count(), 1);
    assert_eq!(customer.dirty.handler_count(), 1);

    drop(wrapper);
    assert_eq!(customer.changed.handler_count(), 0);
    assert_eq!(customer.dirty.handler_count(), 0);
}

struct Ledger {
    balance: Mutex<Value>,
    memo: Mutex<Value>,
    frozen: std::sync::atomic::AtomicBool,
}

impl EntityObject for Ledger {
    fn type_name(&self) -> &str {
        "Ledger"
    }

    fn declared_fields(&self) -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("Balance", FieldType::new(ValueKind::Int64)),
            FieldDefinition::new("Memo", FieldType::new(ValueKind::String)),
        ]
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        match name {
            "Balance" => Some(self.balance.lock().unwrap().clone()),
            "Memo" => Some(self.memo.lock().unwrap().clone()),
            _ => None,
        }
    }

    fn set_field(&self, name: &str, value: Value) -> OrmResult<bool> {
        let slot = match name {
            "Balance" if self.frozen.load(std::sync::atomic::Ordering::SeqCst) => {
                return Err(OrmError::NotSupported("ledger balance is frozen".to_string()))
            }
            "Balance" => &self.balance,
            "Memo" => &self.memo,
            _ => return Err(OrmError::field_not_found(name)),
        };
        let mut current = slot.lock().unwrap();
        if *current == value {
            return Ok(false);
        }
        *current = value;
        Ok(true)
    }
}

#[test]
fn reject_changes_restores_every_field_before_reporting_failure() {
    let ledger = Arc::new(Ledger {
        balance: Mutex::new(Value::Int64(100)),
        memo: Mutex::new(Value::from("opening")),
        frozen: std::sync::atomic::AtomicBool::new(false),
    });
    let wrapper = EntityWrapper::builder("Ledger")
        .object(&ledger)
        .bag(bag_with(&[("Tag", Value::from("q1"))]))
        .state(ObjectState::Unchanged)
        .build();

    wrapper.set("Balance", 250i64).unwrap();
    wrapper.set("Memo", "adjusted").unwrap();
    wrapper.set("Tag", "q2").unwrap();
    ledger.frozen.store(true, std::sync::atomic::Ordering::SeqCst);

    assert!(matches!(wrapper.reject_changes(), Err(OrmError::NotSupported(_))));

    assert_eq!(wrapper.get("Memo").unwrap(), Value::from("opening"));
    assert_eq!(wrapper.get("Tag").unwrap(), Value::from("q1"));
    assert_eq!(wrapper.get("Balance").unwrap(), Value::Int64(250));
    assert_eq!(wrapper.state(), ObjectState::Unchanged);
}
