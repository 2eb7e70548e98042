use apires_core::db::migrations::latest_version;
use apires_core::db::open_db_in_memory;
use apires_core::{
    DesiredResource, ErrorKind, PrincipalId, RepoError, ResourceClaim, ResourceListQuery,
    ResourceOrder, ResourceRepository, ResourceScope, ResourceService, ScopeClaim,
    SqliteOwnershipGate, SqliteResourceRepository,
};
use rusqlite::Connection;

fn alice() -> PrincipalId {
    PrincipalId::new("alice")
}

#[test]
fn create_and_get_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteResourceRepository::try_new(&conn).unwrap();

    let mut desired = DesiredResource::named("orders");
    desired.description = Some("Order management".to_string());
    desired.claims = Some(vec![ResourceClaim::new("email")]);
    let mut scope = ResourceScope::new("orders.read");
    scope.required = true;
    scope.claims = vec![ScopeClaim::new("role")];
    desired.scopes = Some(vec![scope]);

    let id = repo.create_resource(&alice(), &desired).unwrap();
    let loaded = repo.get_resource(id).unwrap().unwrap();

    assert_eq!(loaded.name, "orders");
    assert_eq!(loaded.description.as_deref(), Some("Order management"));
    assert!(loaded.enabled);
    assert!(loaded.created_at > 0);
    assert_eq!(loaded.claims.len(), 1);
    assert_eq!(loaded.claims[0].resource_id, id);
    assert_eq!(loaded.scopes.len(), 1);
    assert!(loaded.scopes[0].required);
    assert!(loaded.scopes[0].show_in_discovery_document);
    assert_eq!(loaded.scopes[0].claim_types(), vec!["role"]);
    assert!(loaded.secrets.is_empty());
}

#[test]
fn create_rejects_preset_child_ids() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteResourceRepository::try_new(&conn).unwrap();

    let mut claim = ResourceClaim::new("email");
    claim.id = 7;
    let mut desired = DesiredResource::named("orders");
    desired.claims = Some(vec![claim]);

    let err = repo.create_resource(&alice(), &desired).unwrap_err();
    match err {
        RepoError::Validation(validation) => assert!(validation.has_issue_for("claims[0].id")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn duplicate_resource_name_is_a_constraint_violation() {
    let conn = open_db_in_memory().unwrap();
    let service = ResourceService::new(
        SqliteResourceRepository::try_new(&conn).unwrap(),
        SqliteOwnershipGate::new(&conn),
    );

    service
        .create(&alice(), &DesiredResource::named("orders"))
        .unwrap();
    let err = service
        .create(&PrincipalId::new("bob"), &DesiredResource::named("orders"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM resource_owners;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn delete_cascades_to_every_child() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteResourceRepository::try_new(&conn).unwrap();

    let mut desired = DesiredResource::named("orders");
    desired.claims = Some(vec![ResourceClaim::new("email")]);
    let mut scope = ResourceScope::new("orders.read");
    scope.claims = vec![ScopeClaim::new("role")];
    desired.scopes = Some(vec![scope]);
    let id = repo.create_resource(&alice(), &desired).unwrap();

    repo.delete_resource(id).unwrap();

    assert!(repo.get_resource(id).unwrap().is_none());
    for table in [
        "api_claims",
        "api_secrets",
        "api_scopes",
        "api_scope_claims",
        "resource_owners",
    ] {
        assert_eq!(count_rows(&conn, table), 0, "{table} still has rows");
    }
    assert!(matches!(
        repo.delete_resource(id).unwrap_err(),
        RepoError::NotFound(missing) if missing == id
    ));
}

#[test]
fn list_only_returns_owned_resources_with_paging() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteResourceRepository::try_new(&conn).unwrap();
    for name in ["gamma", "alpha", "beta"] {
        repo.create_resource(&alice(), &DesiredResource::named(name))
            .unwrap();
    }
    repo.create_resource(&PrincipalId::new("bob"), &DesiredResource::named("delta"))
        .unwrap();

    let query = ResourceListQuery {
        order_by: ResourceOrder::Name,
        skip: 1,
        take: Some(1),
        ..ResourceListQuery::default()
    };
    let page = repo.list_resources(&alice(), &query).unwrap();

    assert_eq!(page.total, 3);
    assert_eq!(page.skip, 1);
    assert_eq!(page.take, 1);
    let names: Vec<&str> = page.items.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["beta"]);

    let descending = repo
        .list_resources(
            &alice(),
            &ResourceListQuery {
                order_by: ResourceOrder::Name,
                descending: true,
                ..ResourceListQuery::default()
            },
        )
        .unwrap();
    let names: Vec<&str> = descending.items.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["gamma", "beta", "alpha"]);
    assert_eq!(descending.take, 10);
}

#[test]
fn list_expands_children_only_on_request() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteResourceRepository::try_new(&conn).unwrap();
    let mut desired = DesiredResource::named("orders");
    desired.claims = Some(vec![ResourceClaim::new("email")]);
    let mut scope = ResourceScope::new("orders.read");
    scope.claims = vec![ScopeClaim::new("role")];
    desired.scopes = Some(vec![scope]);
    repo.create_resource(&alice(), &desired).unwrap();

    let bare = repo
        .list_resources(&alice(), &ResourceListQuery::default())
        .unwrap();
    assert!(bare.items[0].claims.is_empty());
    assert!(bare.items[0].scopes.is_empty());

    let expanded = repo
        .list_resources(
            &alice(),
            &ResourceListQuery {
                name: Some("orders".to_string()),
                expand_scopes: true,
                expand_claims: true,
                ..ResourceListQuery::default()
            },
        )
        .unwrap();
    assert_eq!(expanded.total, 1);
    assert_eq!(expanded.items[0].claims.len(), 1);
    assert_eq!(expanded.items[0].scopes[0].claim_types(), vec!["role"]);
}

#[test]
fn list_for_principal_without_resources_is_empty() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteResourceRepository::try_new(&conn).unwrap();
    repo.create_resource(&alice(), &DesiredResource::named("orders"))
        .unwrap();

    let page = repo
        .list_resources(&PrincipalId::new("bob"), &ResourceListQuery::default())
        .unwrap();

    assert_eq!(page.total, 0);
    assert!(page.items.is_empty());
}

#[test]
fn try_new_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();

    let err = match SqliteResourceRepository::try_new(&conn) {
        Ok(_) => panic!("expected unmigrated connection to be rejected"),
        Err(err) => err,
    };
    match err {
        RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        } => {
            assert_eq!(expected_version, latest_version());
            assert_eq!(actual_version, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}
