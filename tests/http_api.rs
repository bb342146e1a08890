use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use turnero::auth::{AdminAuth, Role};
use turnero::http::{self, AppState};
use turnero::lifecycle::{BookingService, LifecycleSettings};
use turnero::model::TenantScope;
use turnero::notify::NotifyHub;
use turnero::schedule::{InMemorySchedules, ScheduleProvider, Service, default_schedule_for};
use turnero::store::{BookingStore, now_ms};
use turnero::tenant::{InMemoryDirectory, TenantDirectory};
use turnero::token::TokenIssuer;

const SECRET: &[u8] = b"integration-test-secret";
// Monday; the default schedule opens 09:00-13:00 UTC.
const SLOT: &str = "2030-06-10T10:00:00Z";

// ── Test infrastructure ──────────────────────────────────────

struct TestServer {
    addr: SocketAddr,
    client: Client,
    auth: Arc<AdminAuth>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BookingStore::open(dir.path().join("bookings.wal")).unwrap());

        let tenants = Arc::new(InMemoryDirectory::new());
        tenants
            .provision("salon-x", "owner@salon.com", now_ms())
            .await
            .unwrap();
        let schedules = Arc::new(InMemorySchedules::new());
        let scope = TenantScope::Tenant("salon-x".into());
        let mut config = default_schedule_for(&scope);
        config.name = "Salón X".into();
        config.services.push(Service {
            id: "corte".into(),
            name: "Corte de pelo".into(),
            duration_minutes: 30,
        });
        schedules.put_config(&scope, config).await;

        let bookings = Arc::new(BookingService::new(
            store,
            tenants,
            schedules,
            Arc::new(NotifyHub::new()),
            TokenIssuer::new(SECRET, 4),
            LifecycleSettings::default(),
        ));
        let auth = Arc::new(AdminAuth::new(SECRET, 8));
        let state = AppState {
            bookings,
            auth: auth.clone(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = http::serve(listener, state, std::future::pending()).await;
        });

        Self {
            addr,
            client: Client::new(),
            auth,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn session(&self, tenant: Option<&str>, role: Role) -> String {
        let token = self.auth.issue_session(tenant, role, now_ms()).unwrap();
        format!("Bearer {token}")
    }

    fn owner(&self) -> String {
        self.session(Some("salon-x"), Role::Owner)
    }

    async fn book(&self, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(self.url("/reservas"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

fn booking_body(tenant: Option<&str>, email: &str, start: &str) -> Value {
    let mut body = json!({
        "usuario": { "nombre": "Ana Pérez", "email": email },
        "fechaInicio": start,
        "servicio": "corte",
        "duracion": 30,
    });
    if let Some(t) = tenant {
        body["idNegocio"] = json!(t);
    }
    body
}

// ── Customer flow ────────────────────────────────────────────

#[tokio::test]
async fn second_customer_in_a_full_slot_gets_conflict() {
    let server = TestServer::start().await;

    let (status, body) = server
        .book(booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["cancellationToken"].as_str().unwrap().len(), 64);
    assert_eq!(body["emailContacto"], "owner@salon.com");

    let (status, body) = server
        .book(booking_body(Some("salon-x"), "luis@example.com", SLOT))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn global_booking_has_no_contact_email() {
    let server = TestServer::start().await;
    let (status, body) = server.book(booking_body(None, "ana@example.com", SLOT)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.get("emailContacto").is_none());
}

#[tokio::test]
async fn invalid_and_unknown_requests() {
    let server = TestServer::start().await;

    let (status, body) = server.book(json!({ "servicio": "corte" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["detalles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"usuario.nombre"));
    assert!(fields.contains(&"fechaInicio"));

    let (status, _) = server
        .book(booking_body(Some("nadie"), "ana@example.com", SLOT))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let resp = server
        .client
        .post(server.url("/reservas"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signed_link_confirms_once() {
    let server = TestServer::start().await;
    let (_, created) = server
        .book(booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .await;
    let token = created["token"].as_str().unwrap();

    let (status, body) = server.get(&format!("/reservas/confirmar/{token}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["reserva"]["estado"], "confirmada");
    assert!(body["reserva"].get("expiresAt").is_none());

    let (status, _) = server.get(&format!("/reservas/confirmar/{token}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server.get("/reservas/confirmar/not-a-token").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stored_token_confirms() {
    let server = TestServer::start().await;
    let (_, created) = server
        .book(booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .await;
    let token = created["token"].as_str().unwrap();

    let resp = server
        .client
        .post(server.url(&format!("/reservas/confirmar-definitiva/{token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reserva"]["estado"], "confirmada");
}

#[tokio::test]
async fn cancel_by_token_twice() {
    let server = TestServer::start().await;
    let (_, created) = server
        .book(booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .await;
    let url = server.url(&format!(
        "/reservas/cancelar-por-token/{}",
        created["cancellationToken"].as_str().unwrap()
    ));

    let resp = server.client.post(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["message"].is_string());

    let resp = server.client.post(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // The slot is free again.
    let (status, _) = server
        .book(booking_body(Some("salon-x"), "luis@example.com", SLOT))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn list_filters_and_orders() {
    let server = TestServer::start().await;
    for (email, start) in [
        ("c@example.com", "2030-06-10T12:00:00Z"),
        ("a@example.com", "2030-06-10T09:00:00Z"),
        ("b@example.com", "2030-06-11T10:00:00Z"),
    ] {
        let (_, created) = server.book(booking_body(Some("salon-x"), email, start)).await;
        let token = created["token"].as_str().unwrap();
        server.get(&format!("/reservas/confirmar/{token}")).await;
    }
    server
        .book(booking_body(Some("salon-x"), "d@example.com", "2030-06-10T11:00:00Z"))
        .await;

    let (status, body) = server
        .get("/reservas?idNegocio=salon-x&estado=confirmada")
        .await;
    assert_eq!(status, StatusCode::OK);
    let starts: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["fechaInicio"].as_str().unwrap())
        .collect();
    assert_eq!(
        starts,
        [
            "2030-06-10T09:00:00.000Z",
            "2030-06-10T12:00:00.000Z",
            "2030-06-11T10:00:00.000Z"
        ]
    );

    let (_, body) = server.get("/reservas?idNegocio=salon-x&fecha=2030-06-10").await;
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (_, body) = server.get("/reservas").await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = server.get("/reservas?fecha=10/06/2030").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn availability_probe() {
    let server = TestServer::start().await;
    let probe = format!("/reservas/disponibilidad?idNegocio=salon-x&servicio=corte&fechaInicio={SLOT}");

    let (status, body) = server.get(&probe).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "disponible": true }));

    server
        .book(booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .await;
    let (_, body) = server.get(&probe).await;
    assert_eq!(body["disponible"], false);
    assert!(body["motivo"].is_string());

    let (_, body) = server
        .get("/reservas/disponibilidad?idNegocio=salon-x&servicio=corte&fechaInicio=2030-06-10T14:00:00Z")
        .await;
    assert_eq!(body["disponible"], false);
}

// ── Privileged routes ────────────────────────────────────────

#[tokio::test]
async fn admin_routes_require_a_session() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(server.url("/reservas/admin"))
        .json(&booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = server
        .client
        .post(server.url("/reservas/admin"))
        .header("authorization", "Bearer forged")
        .json(&booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = server
        .client
        .post(server.url("/reservas/admin"))
        .header("authorization", server.session(Some("otro"), Role::Owner))
        .json(&booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_create_confirm_cancel_delete() {
    let server = TestServer::start().await;
    let owner = server.owner();

    let mut body = booking_body(None, "ana@example.com", "2030-06-10T20:00:00Z");
    body["notas"] = json!("cliente habitual");
    let resp = server
        .client
        .post(server.url("/reservas/admin"))
        .header("authorization", &owner)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let booking: Value = resp.json().await.unwrap();
    assert_eq!(booking["estado"], "confirmada");
    assert_eq!(booking["idNegocio"], "salon-x");
    assert_eq!(booking["notas"], "cliente habitual");
    assert!(booking.get("expiresAt").is_none());
    let id = booking["id"].as_str().unwrap();

    let resp = server
        .client
        .put(server.url(&format!("/reservas/{id}/confirm")))
        .header("authorization", &owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let cancel = server.url(&format!("/reservas/{id}/cancelar"));
    let resp = server
        .client
        .patch(&cancel)
        .header("authorization", &owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cancelled: Value = resp.json().await.unwrap();
    assert_eq!(cancelled["estado"], "cancelada");

    let resp = server
        .client
        .patch(&cancel)
        .header("authorization", &owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let delete = server.url(&format!("/reservas/{id}"));
    let resp = server
        .client
        .delete(&delete)
        .header("authorization", &owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));

    let resp = server
        .client
        .delete(&delete)
        .header("authorization", &owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn owner_cannot_touch_other_tenants() {
    let server = TestServer::start().await;
    let (_, created) = server
        .book(booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .await;
    let token = created["token"].as_str().unwrap();
    let (_, confirmed) = server.get(&format!("/reservas/confirmar/{token}")).await;
    let id = confirmed["reserva"]["id"].as_str().unwrap();

    let resp = server
        .client
        .patch(server.url(&format!("/reservas/{id}/cancelar")))
        .header("authorization", server.session(Some("otro"), Role::Owner))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = server
        .client
        .delete(server.url(&format!("/reservas/{id}?idNegocio=salon-x")))
        .header("authorization", server.session(Some("otro"), Role::Owner))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

// ── Catalog ──────────────────────────────────────────────────

#[tokio::test]
async fn config_and_services() {
    let server = TestServer::start().await;

    let (status, services) = server.get("/servicios?idNegocio=salon-x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(services[0]["id"], "corte");
    assert_eq!(services[0]["nombre"], "Corte de pelo");

    let update = json!({
        "idNegocio": "salon-x",
        "nombre": "Salón X",
        "duracionBase": 30,
        "maxReservasPorSlot": 2,
        "servicios": [{ "id": "corte", "nombre": "Corte", "duracion": 30 }],
        "horariosNormales": [{ "dia": 1, "tramos": [{ "horaInicio": "08:00", "horaFin": "20:00" }] }],
    });
    let resp = server
        .client
        .put(server.url("/config"))
        .header("authorization", server.owner())
        .json(&update)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (_, config) = server.get("/config?idNegocio=salon-x").await;
    assert_eq!(config["maxReservasPorSlot"], 2);

    // Capacity 2 now admits a second booking at the same instant.
    for email in ["ana@example.com", "luis@example.com"] {
        let mut body = booking_body(Some("salon-x"), email, SLOT);
        body["servicio"] = json!(if email.starts_with("ana") { "corte" } else { "tinte" });
        let (status, _) = server.book(body).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let mut bad = update.clone();
    bad["horariosNormales"][0]["tramos"][0]["horaInicio"] = json!("8am");
    let resp = server
        .client
        .put(server.url("/config"))
        .header("authorization", server.owner())
        .json(&bad)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn blocked_dates_close_the_day() {
    let server = TestServer::start().await;
    let owner = server.owner();

    let block = |fecha: &str| {
        server
            .client
            .post(server.url("/bloqueos"))
            .header("authorization", &owner)
            .json(&json!({ "idNegocio": "salon-x", "fecha": fecha }))
            .send()
    };
    assert_eq!(block("2030-06-10").await.unwrap().status(), StatusCode::CREATED);
    assert_eq!(block("2030-06-10").await.unwrap().status(), StatusCode::OK);
    assert_eq!(block("10-06-2030").await.unwrap().status(), StatusCode::BAD_REQUEST);

    let (_, dates) = server.get("/bloqueos?idNegocio=salon-x").await;
    assert_eq!(dates, json!([{ "fecha": "2030-06-10" }]));

    let (status, _) = server
        .book(booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let unblock = server.url("/bloqueos/2030-06-10?idNegocio=salon-x");
    let resp = server
        .client
        .delete(&unblock)
        .header("authorization", &owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = server
        .client
        .delete(&unblock)
        .header("authorization", &owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (status, _) = server
        .book(booking_body(Some("salon-x"), "ana@example.com", SLOT))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn provisioning_is_superadmin_only() {
    let server = TestServer::start().await;
    let body = json!({ "idNegocio": "Barberia-Sur", "emailContacto": "sur@example.com" });

    let resp = server
        .client
        .post(server.url("/negocios"))
        .header("authorization", server.owner())
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let root = server.session(None, Role::SuperAdmin);
    let resp = server
        .client
        .post(server.url("/negocios"))
        .header("authorization", &root)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let tenant: Value = resp.json().await.unwrap();
    assert_eq!(tenant["idNegocio"], "barberia-sur");
    assert_eq!(tenant["estado"], "activo");

    let resp = server
        .client
        .post(server.url("/negocios"))
        .header("authorization", &root)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, _) = server
        .book(booking_body(Some("barberia-sur"), "ana@example.com", SLOT))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn tenant_ids_resolve_the_same_way_everywhere() {
    let server = TestServer::start().await;
    let root = server.session(None, Role::SuperAdmin);

    let resp = server
        .client
        .post(server.url("/negocios"))
        .header("authorization", &root)
        .json(&json!({ "idNegocio": "salon.y", "emailContacto": "y@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let (status, _) = server
        .book(booking_body(Some("salon.y"), "ana@example.com", SLOT))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = server.get("/reservas?idNegocio=salon.y").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = server.get("/config?idNegocio=salon.y").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Case and padding fold to the same tenant on write and read.
    let (status, _) = server
        .book(booking_body(Some("  Salon-X "), "ana@example.com", SLOT))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, listed) = server.get("/reservas?idNegocio=SALON-X").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["idNegocio"], "salon-x");
}
