
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use log::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use utoipa::ToSchema;

use crate::{config::{ConfigBases, SemsConfig}, get_config_or_panic, CONFIG};
use crate::mqtt::{get_app_status, MqttConnectionStatus};


pub struct ApiManager;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub mqtt: MqttHealthInfo,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Serialize, ToSchema)]
pub struct MqttHealthInfo {
    pub status: String,
    pub last_connected_ago_seconds: Option<u64>,
    pub last_message_sent_ago_seconds: Option<u64>,
    pub last_message_received_ago_seconds: Option<u64>,
    pub connection_attempts: u64,
}

// GET handlers to retrieve the current configuration

#[utoipa::path(get,
    path = "/health",
    summary = "Health check endpoint for container monitoring",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy")
    ),
)]
async fn health_check() -> impl Responder {
    let app_status = get_app_status().await;
    let mqtt_health = &app_status.mqtt_health;
    let now = std::time::Instant::now();
    let system_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    // Calculate time differences
    let last_connected_ago = mqtt_health.last_connected
        .map(|t| now.duration_since(t).as_secs());
    let last_message_sent_ago = mqtt_health.last_message_sent
        .map(|t| now.duration_since(t).as_secs());
    let last_message_received_ago = mqtt_health.last_message_received
        .map(|t| now.duration_since(t).as_secs());

    let mqtt_status = match &mqtt_health.status {
        MqttConnectionStatus::Connected => "connected",
        MqttConnectionStatus::Disconnected => "disconnected",
        MqttConnectionStatus::Reconnecting => "reconnecting",
        MqttConnectionStatus::Error(_) => "error",
    };

    let overall_healthy = matches!(mqtt_health.status, MqttConnectionStatus::Connected) &&
        last_message_sent_ago.unwrap_or(3600) < 300; // Consider healthy if last message sent within 5 minutes

    let response = HealthResponse {
        status: if overall_healthy { "healthy".to_string() } else { "unhealthy".to_string() },
        mqtt: MqttHealthInfo {
            status: mqtt_status.to_string(),
            last_connected_ago_seconds: last_connected_ago,
            last_message_sent_ago_seconds: last_message_sent_ago,
            last_message_received_ago_seconds: last_message_received_ago,
            connection_attempts: mqtt_health.connection_attempts,
        },
        uptime_seconds: app_status.uptime_seconds(),
        timestamp: system_time,
    };

    if overall_healthy {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

#[utoipa::path(get,
    path = "/api/v1/config",
    summary = "Get the whole configuration as stored in the memory of the application",
    responses(
        (status = 200, description = "Get current running config")
    ),
)]
async fn get_config() -> impl Responder {
    let config = CONFIG.read().unwrap().get_complete_config();
    HttpResponse::Ok().content_type("application/json").json(config)
}

#[utoipa::path(post,
    path = "/api/v1/config/save",
    summary = "Force save current configuration",
    responses(
        (status = 200, description = "Configuration saved"),
        (status = 500, description = "Failed to save configuration")
    ),
)]
async fn save_config() -> impl Responder {
    info!("Config save requested over the API");
    // Force the config to be dirty so it will be saved
    {
        let mut config = CONFIG.write().unwrap();
        config.dirty = true;
        config.save();
    }
    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "message": "Configuration saved successfully"
    }))
}

//////////////////// SEMS WALLBOXES //////////////////////////////////////////////////////////////////////////////////////

#[utoipa::path(get,
    path = "/api/v1/sems",
    summary = "Get all configured SEMS wallboxes",
    responses(
        (status = 200, description = "Get current running wallbox config")
    ),
)]
async fn get_sems_config() -> impl Responder {
    let config = get_config_or_panic!("sems", ConfigBases::Sems);
    HttpResponse::Ok().content_type("application/json").json(config)
}

// Add a new wallbox
#[utoipa::path(post,
    path = "/api/v1/sems",
    summary = "Add a new SEMS wallbox",
    request_body (content = SemsConfig, description = "Wallbox definiton to be added to the configuration", content_type = "application/json"),
    responses (
        (status = 200, description = "The wallbox was added"),
        (status = 400, description = "The name of the wallbox is already taken")
    ),
)]
async fn add_sems_wallbox(
    wallbox_req: web::Json<SemsConfig>,
) -> impl Responder {

    info!("Adding new SEMS wallbox {}", wallbox_req.name);

    let mut config = get_config_or_panic!("sems", ConfigBases::Sems);

    // Check if a wallbox with this name already exists
    if config.iter().any(|w| w.name == wallbox_req.name) {
        return HttpResponse::BadRequest().body("Wallbox with this name already exists");
    }

    config.push(wallbox_req.into_inner());

    let mut writer = CONFIG.write().unwrap();
    writer.update_config(crate::config::ConfigOperation::ADD, ConfigBases::Sems(config));

    HttpResponse::Created().body("Created")
}


#[utoipa::path(delete,
    path = "/api/v1/sems/{name}",
    summary = "Delete a SEMS wallbox",
    params(
        ("name", description = "Name of the wallbox to delete")
    ),
    responses(
        (status = 200, description = "The wallbox was deleted"),
        (status = 404, description = "The wallbox was not found in the configuration")
    ),
)]
async fn delete_sems_wallbox(
    path: web::Path<String>,
) -> impl Responder {
    let wallbox_name = path.into_inner();
    let mut config = get_config_or_panic!("sems", ConfigBases::Sems);
    info!("Called to delete \"{wallbox_name}\"");

    let initial_len = config.len();
    config.retain(|w| w.name != wallbox_name);

    if config.len() < initial_len {
        // Notify about the config change
        CONFIG.write().unwrap().update_config(crate::config::ConfigOperation::DELETE, ConfigBases::Sems(config));
        HttpResponse::Ok().body(format!("Wallbox '{}' deleted", wallbox_name))
    } else {
        HttpResponse::NotFound().content_type("text/plain").body(format!("Wallbox '{}' not found", wallbox_name))
    }
}


// Websocket to push config changes to the client log file
#[utoipa::path(get,
    path = "/api/v1/ws/configChanges",
    summary = "Websocket to get live config changes",
    responses(
        (status = 101, description = "The websocket is active and can be used to get configuration updates"),
    ),
)]
async fn ws_config_changes(req: HttpRequest, body: web::Payload) -> actix_web::Result<impl Responder> {
    let (response, mut session, mut _msg_stream) = actix_ws::handle(&req, body)?;

    let mut thread_receiver = CONFIG.read().unwrap().get_change_receiver();
    actix_web::rt::spawn(async move {

        while let Ok(msg) = thread_receiver.recv().await {
            let _ = session.text(serde_json::to_string(&msg).unwrap()).await;
        }

        let _ = session.close(None).await;
    });

    Ok(response)
}

impl ApiManager {
    pub fn new() -> Self {
        return ApiManager;
    }

    pub async fn start_thread(&self) {

        let config = get_config_or_panic!("httpd", ConfigBases::Httpd);

        if !config.enabled {
            error!("Sorry webserver can not be disabled, please fix config");
        }

        #[derive(OpenApi)]
        #[openapi(
            info(description = "sems2mqtt API description"),
            paths(
                    health_check,
                    get_config,
                    save_config,
                    ws_config_changes,
                    get_sems_config,
                    add_sems_wallbox,
                    delete_sems_wallbox,
            )
        )]
        struct ApiDoc;

        let _ = HttpServer::new(move || {
            App::new()
                // Register routes
                .route("/health", web::get().to(health_check))
                .route("/api/v1/config", web::get().to(get_config))
                .route("/api/v1/config/save", web::post().to(save_config))
                .route("/api/v1/sems", web::get().to(get_sems_config))
                .route("/api/v1/sems", web::post().to(add_sems_wallbox))
                .route("/api/v1/sems/{name}", web::delete().to(delete_sems_wallbox))
                .route("/api/v1/ws/configChanges", web::get().to(ws_config_changes))
                .service(
                    SwaggerUi::new("/swagger-ui/{_:.*}")
                        .url("/api/v1/openapi.json", ApiDoc::openapi()),
                )
        })
        .bind(format!("0.0.0.0:{}", config.port)).unwrap()
        .run()
        .await;

    }
}
