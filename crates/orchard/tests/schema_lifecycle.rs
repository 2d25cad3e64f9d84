//! Registration, materialization, and DDL issuance through the facade.

mod support;

use asupersync::runtime::RuntimeBuilder;
use orchard::{Cx, Database, DatabaseBuilder};
use orchard_schema::testing::{Post, School, Student, Tag};
use support::{MockConnection, issued_sql, unwrap_outcome};

fn connect_fixtures(conn: MockConnection) -> Database<MockConnection> {
    DatabaseBuilder::new()
        .register::<School>()
        .register::<Student>()
        .register::<Tag>()
        .register::<Post>()
        .connect(conn)
        .expect("fixture models resolve and build")
}

#[test]
fn test_create_all_issues_tables_then_junctions() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(async move {
        let conn = MockConnection::new();
        let state = conn.state();
        let db = connect_fixtures(conn);
        unwrap_outcome(db.create_all(&cx).await);

        let sql = issued_sql(&state);
        assert_eq!(sql.len(), 5);
        // Registration order first, shared junction last.
        assert!(sql[0].starts_with("CREATE TABLE IF NOT EXISTS \"schools\""));
        assert!(sql[1].starts_with("CREATE TABLE IF NOT EXISTS \"students\""));
        assert!(sql[4].starts_with("CREATE TABLE IF NOT EXISTS \"posts_and_tags\""));
        // The synthetic foreign-key column and its constraint are inline.
        assert!(sql[1].contains("\"schools_id\" BIGINT NOT NULL"));
        assert!(sql[1].contains("FOREIGN KEY (\"schools_id\") REFERENCES \"schools\" (\"id\")"));
    });
}

#[test]
fn test_drop_all_removes_junctions_first() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(async move {
        let conn = MockConnection::new();
        let state = conn.state();
        let db = connect_fixtures(conn);
        unwrap_outcome(db.drop_all(&cx).await);

        let sql = issued_sql(&state);
        assert_eq!(sql[0], "DROP TABLE IF EXISTS \"posts_and_tags\"");
        // Reverse registration order for the model tables.
        assert_eq!(sql.last().map(String::as_str), Some("DROP TABLE IF EXISTS \"schools\""));
    });
}

#[test]
fn test_registration_order_does_not_change_derived_names() {
    let forward = DatabaseBuilder::new()
        .register::<School>()
        .register::<Student>()
        .connect(MockConnection::new())
        .expect("resolves");
    let backward = DatabaseBuilder::new()
        .register::<Student>()
        .register::<School>()
        .connect(MockConnection::new())
        .expect("resolves");

    for db in [&forward, &backward] {
        let schema = db.registry().get("Student").expect("registered");
        let fk = schema
            .field("school")
            .and_then(|f| f.as_foreign_key())
            .expect("foreign key");
        assert_eq!(fk.column_name.as_deref(), Some("schools_id"));
        assert_eq!(fk.target_column, Some("id"));
        assert_eq!(fk.related_field_name, Some("students"));
    }
}

#[test]
fn test_junction_name_is_lexicographic_and_shared() {
    let db = connect_fixtures(MockConnection::new());
    let tag_side = db
        .registry()
        .get("Tag")
        .ok()
        .and_then(|s| s.field("posts").and_then(|f| f.as_many_to_many()).cloned())
        .expect("resolved m2m");
    let post_side = db
        .registry()
        .get("Post")
        .ok()
        .and_then(|s| s.field("tags").and_then(|f| f.as_many_to_many()).cloned())
        .expect("resolved m2m");
    assert_eq!(tag_side.junction_table.as_deref(), Some("posts_and_tags"));
    assert_eq!(post_side.junction_table.as_deref(), Some("posts_and_tags"));
    assert_eq!(tag_side.junction_column.as_deref(), Some("tags_id"));
    assert_eq!(post_side.junction_column.as_deref(), Some("posts_id"));
}
