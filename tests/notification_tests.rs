/// Notification tests
///
/// Per-object change delivery after commits, deletion, token lifetime and
/// the async change stream.
/// Run with: cargo test --test notification_tests
use futures::StreamExt;
use livemodel::{
    Link, LinkingObjects, List, ObjectAccessor, ObjectChange, ObjectError, ObjectModel,
    SchemaRegistry, Session, SessionConfig, Value, unsubscribe,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

#[derive(ObjectModel)]
struct Person {
    name: String,
    age: Option<i64>,
    #[property(linking_objects(property = "owner"))]
    dogs: LinkingObjects<Dog>,
}

#[derive(ObjectModel)]
struct Dog {
    name: String,
    owner: Option<Link<Person>>,
    tags: List<String>,
}

#[derive(ObjectModel)]
struct Scale {
    reading: f64,
}

fn open() -> Session {
    let registry = Arc::new(SchemaRegistry::new());
    registry.register_model::<Dog>().unwrap();
    registry.register_model::<Person>().unwrap();
    Session::with_registry(SessionConfig::new("notification_tests"), registry).unwrap()
}

fn create_dog(session: &Session, name: &str) -> livemodel::Result<ObjectAccessor> {
    session.write(|s| {
        s.create_model(Dog {
            name: name.to_string(),
            owner: None,
            tags: List::default(),
        })
    })
}

fn create_person(session: &Session, name: &str) -> livemodel::Result<ObjectAccessor> {
    session.write(|s| {
        s.create_model(Person {
            name: name.to_string(),
            age: None,
            dogs: LinkingObjects::default(),
        })
    })
}

type Seen = Arc<Mutex<Vec<ObjectChange>>>;

fn recorder() -> (Seen, impl FnMut(ObjectChange) + Send + 'static) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |change| sink.lock().unwrap().push(change))
}

#[test]
fn test_change_reports_old_and_new_values() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let (seen, callback) = recorder();
    let _token = rex.subscribe(callback)?;

    session.write(|_| {
        rex.write_property("name", "Max")?;
        rex.write_property("tags", List(vec!["good"]))
    })?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0],
        ObjectChange::Changed {
            property_names: vec!["name".into(), "tags".into()],
            old_values: vec![Value::from("Rex"), Value::List(vec![])],
            new_values: vec![
                Value::from("Max"),
                Value::List(vec![Value::from("good")])
            ],
        }
    );
    Ok(())
}

#[test]
fn test_unchanged_values_not_reported() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let (seen, callback) = recorder();
    let _token = rex.subscribe(callback)?;

    session.write(|_| rex.write_property("name", "Rex"))?;
    session.write(|_| {
        rex.write_property("name", "Max")?;
        rex.write_property("name", "Rex")
    })?;
    // commits touching other objects
    create_dog(&session, "Fido")?;

    assert!(seen.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_tiny_float_change_reported() -> anyhow::Result<()> {
    let session = open();
    let mut scale = session.write(|s| s.create_model(Scale { reading: 0.0 }))?;
    let (seen, callback) = recorder();
    let _token = scale.subscribe(callback)?;

    session.write(|_| scale.write_property("reading", 1e-17))?;
    session.write(|_| scale.write_property("reading", 1e-17 + f64::EPSILON))?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[0],
        ObjectChange::Changed {
            property_names: vec!["reading".into()],
            old_values: vec![Value::Float(0.0)],
            new_values: vec![Value::Float(1e-17)],
        }
    );
    assert_eq!(seen[1].property_names(), ["reading".to_string()]);
    Ok(())
}

#[test]
fn test_deletion_delivered_once() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let (seen, callback) = recorder();
    let token = rex.subscribe(callback)?;

    session.write(|s| s.delete(&rex))?;
    assert!(!token.is_valid());
    create_dog(&session, "Fido")?;
    session.write(|_| Ok(()))?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].is_deleted());
    assert!(matches!(
        seen[0].error(),
        Some(ObjectError::StaleRow { .. })
    ));
    Ok(())
}

#[test]
fn test_no_delivery_after_token_dropped() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let (seen, callback) = recorder();
    let token = rex.subscribe(callback)?;

    session.write(|_| rex.write_property("name", "Max"))?;
    drop(token);
    session.write(|_| rex.write_property("name", "Rex"))?;

    assert_eq!(seen.lock().unwrap().len(), 1);
    Ok(())
}

#[test]
fn test_unsubscribe_is_idempotent() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let (seen, callback) = recorder();
    let token = rex.subscribe(callback)?;

    unsubscribe(&token);
    unsubscribe(&token);
    token.invalidate();
    assert!(!token.is_valid());

    session.write(|_| rex.write_property("name", "Max"))?;
    assert!(seen.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_dropping_accessor_ends_subscription() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let schema = rex.schema().clone();
    let row = rex.row_id().unwrap();
    let (seen, callback) = recorder();
    let token = rex.subscribe(callback)?;

    drop(rex);
    assert!(!token.is_valid());

    let mut again = session.object(&schema, row)?;
    session.write(|_| again.write_property("name", "Max"))?;
    assert!(seen.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_subscription_owned_by_subscribing_accessor() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let (seen, callback) = recorder();
    let token = rex.subscribe(callback)?;

    let mut copy = rex.clone();
    drop(copy.clone());
    session.write(|_| copy.write_property("name", "Max"))?;
    drop(copy);
    assert!(token.is_valid());
    assert_eq!(seen.lock().unwrap().len(), 1);

    drop(rex);
    assert!(!token.is_valid());
    Ok(())
}

#[test]
fn test_subscribe_requires_managed_object_outside_write() -> anyhow::Result<()> {
    let session = open();
    let schema = session.schema::<Dog>()?;
    let mut loose = ObjectAccessor::bind_unmanaged([("name", "Rex")], schema)?;
    assert!(matches!(
        loose.subscribe(|_| {}),
        Err(ObjectError::InvalidState(_))
    ));

    let mut rex = create_dog(&session, "Rex")?;
    session.begin_write()?;
    assert!(matches!(
        rex.subscribe(|_| {}),
        Err(ObjectError::InvalidState(_))
    ));
    session.cancel_write()?;
    Ok(())
}

#[test]
fn test_linking_objects_change_reported() -> anyhow::Result<()> {
    let session = open();
    let mut ann = create_person(&session, "Ann")?;
    let (seen, callback) = recorder();
    let _token = ann.subscribe(callback)?;

    let owner = ann.row_id().unwrap();
    let rex = session.write(|s| {
        s.create_model(Dog {
            name: "Rex".into(),
            owner: Some(Link::to_row(owner)),
            tags: List::default(),
        })
    })?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].property_names(), ["dogs".to_string()]);
    let properties = seen[0].properties();
    let change = &properties[0];
    assert_eq!(change.old_value, Value::List(vec![]));
    assert_eq!(
        change.new_value,
        Value::List(vec![Value::Link(rex.as_link().unwrap())])
    );
    Ok(())
}

#[test]
fn test_commit_from_callback_is_delivered_after() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let mut ann = create_person(&session, "Ann")?;
    let order = Arc::new(Mutex::new(Vec::new()));

    let writer = session.clone();
    let mut target = ann.clone();
    let log = order.clone();
    let _rex_token = rex.subscribe(move |_| {
        log.lock().unwrap().push("rex");
        writer
            .write(|_| target.write_property("age", 30))
            .unwrap();
    })?;

    let log = order.clone();
    let _ann_token = ann.subscribe(move |_| log.lock().unwrap().push("ann"))?;

    session.write(|_| rex.write_property("name", "Max"))?;

    assert_eq!(*order.lock().unwrap(), vec!["rex", "ann"]);
    assert_eq!(ann.read_property("age")?, Value::Integer(30));
    Ok(())
}

#[test]
fn test_invalidate_waits_for_running_callback() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let (started_tx, started_rx) = mpsc::channel();
    let finished = Arc::new(AtomicBool::new(false));

    let done = finished.clone();
    let token = rex.subscribe(move |_| {
        started_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        done.store(true, Ordering::SeqCst);
    })?;

    let observed = finished.clone();
    let canceller = std::thread::spawn(move || {
        started_rx.recv().unwrap();
        token.invalidate();
        observed.load(Ordering::SeqCst)
    });

    session.write(|_| rex.write_property("name", "Max"))?;
    assert!(canceller.join().unwrap());
    Ok(())
}

#[tokio::test]
async fn test_change_stream_ends_after_deletion() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let mut changes = rex.changes()?;

    session.write(|_| rex.write_property("name", "Max"))?;
    session.write(|s| s.delete(&rex))?;

    let first = changes.next().await.unwrap();
    assert_eq!(first.property_names(), ["name".to_string()]);
    let second = changes.next().await.unwrap();
    assert!(second.is_deleted());
    assert!(changes.next().await.is_none());
    assert!(!changes.token().is_valid());
    Ok(())
}

#[test]
fn test_change_stream_wakes_on_commit() -> anyhow::Result<()> {
    let session = open();
    let mut rex = create_dog(&session, "Rex")?;
    let mut changes = rex.changes()?;

    let mut next = tokio_test::task::spawn(changes.next());
    tokio_test::assert_pending!(next.poll());

    session.write(|_| rex.write_property("name", "Max"))?;
    assert!(next.is_woken());
    let change = tokio_test::assert_ready!(next.poll()).unwrap();
    assert_eq!(change.property_names(), ["name".to_string()]);
    drop(next);

    changes.close();
    assert!(!changes.token().is_valid());
    Ok(())
}
