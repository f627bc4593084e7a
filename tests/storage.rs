use barangay_server::db::Database;
use barangay_server::geo::Coordinate;
use barangay_server::models::{NewTask, PostStatus, Role, TaskStatus};
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(temp_dir.path().join("test.db")).unwrap();
    (temp_dir, db)
}

fn new_task(title: &str, location: Option<Coordinate>) -> NewTask {
    NewTask {
        title: title.to_string(),
        description: "Needs doing".to_string(),
        payment_amount: Some(50.0),
        location,
        location_address: location.map(|_| "Purok 3".to_string()),
        creator_id: "maria".to_string(),
    }
}

#[test]
fn test_data_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");
    let here = Coordinate::new(14.5995, 120.9842).unwrap();

    let id = {
        let db = Database::new(&path).unwrap();
        db.create_user("maria", "Maria Santos", Role::Resident).unwrap();
        db.insert_task(&new_task("Fix fence", Some(here))).unwrap().id
    };

    let db = Database::new(&path).unwrap();
    let task = db.get_task(&id).unwrap().unwrap();
    assert_eq!(task.title, "Fix fence");
    assert_eq!(task.location, Some(here));
    assert_eq!(task.creator_name, "Maria Santos");
    assert_eq!(task.payment_amount, Some(50.0));
}

#[test]
fn test_list_newest_first() {
    let (_temp_dir, db) = create_test_db();
    db.create_user("maria", "Maria", Role::Resident).unwrap();

    let first = db.insert_task(&new_task("first", None)).unwrap();
    let second = db.insert_task(&new_task("second", None)).unwrap();

    let tasks = db.list_tasks().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, second.id);
    assert_eq!(tasks[1].id, first.id);
}

#[test]
fn test_status_counts_follow_transitions() {
    let (_temp_dir, db) = create_test_db();
    db.create_user("maria", "Maria", Role::Resident).unwrap();
    db.create_user("jose", "Jose", Role::Resident).unwrap();

    let a = db.insert_task(&new_task("a", None)).unwrap();
    db.insert_task(&new_task("b", None)).unwrap();
    assert_eq!(db.accept_task(&a.id, "jose").unwrap(), 1);

    assert_eq!(db.count_tasks_by_status(TaskStatus::Open).unwrap(), 1);
    assert_eq!(db.count_tasks_by_status(TaskStatus::InProgress).unwrap(), 1);
}

#[test]
fn test_gc_keeps_fresh_rows() {
    let (_temp_dir, db) = create_test_db();
    db.create_user("maria", "Maria", Role::Resident).unwrap();
    db.create_user("mod", "Mod", Role::Moderator).unwrap();

    let task = db.insert_task(&new_task("a", None)).unwrap();
    db.cancel_task(&task.id, "maria").unwrap();
    let post = db.insert_post("maria", "spam").unwrap();
    db.moderate_post(&post.id, "mod", PostStatus::Rejected, None).unwrap();

    assert_eq!(db.gc_cancelled_tasks(30).unwrap(), 0);
    assert_eq!(db.gc_rejected_posts(30).unwrap(), 0);
    assert!(db.get_task(&task.id).unwrap().is_some());
}
