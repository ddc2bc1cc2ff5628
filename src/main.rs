use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};
use vault_engine::config::{load_view_preferences, save_view_preferences};
use vault_engine::logging::init_logging;
use vault_engine::memory::MemoryVault;
use vault_engine::{
    Credential, EngineConfig, EngineError, ItemRef, SelectMode, SortDirection, SortField, UploadEvent, VaultClient,
    ViewSnapshot,
};

const DEMO_PIN: &str = "4321";
const CONFIG_DIR_ENV: &str = "VAULT_ENGINE_CONFIG_DIR";

fn seed(vault: &MemoryVault) -> Result<(), EngineError> {
    let seeding = |err| EngineError::remote("seed", err);
    vault.set_pin(DEMO_PIN).map_err(seeding)?;
    vault.set_session_ttl(5);

    let docs = vault.seed_folder("Documents", None).map_err(seeding)?;
    let photos = vault.seed_folder("Photos", None).map_err(seeding)?;
    let taxes = vault.seed_folder("Taxes", Some(&docs)).map_err(seeding)?;
    vault.seed_file("notes.md", 2_048, "text/markdown", None).map_err(seeding)?;
    vault.seed_file("Äpfel.pdf", 91_000, "application/pdf", Some(&docs)).map_err(seeding)?;
    vault.seed_file("zebra.pdf", 12_000, "application/pdf", Some(&docs)).map_err(seeding)?;
    vault.seed_file("apple.txt", 300, "text/plain", Some(&docs)).map_err(seeding)?;
    vault.seed_file("return-2023.pdf", 400_000, "application/pdf", Some(&taxes)).map_err(seeding)?;
    vault.seed_file("beach.jpg", 3_200_000, "image/jpeg", Some(&photos)).map_err(seeding)?;
    Ok(())
}

fn log_view(view: &ViewSnapshot) {
    let path: Vec<&str> = view.breadcrumbs.iter().map(|crumb| crumb.name.as_str()).collect();
    info!(
        path = %format!("/{}", path.join("/")),
        version = view.version,
        folders = view.folders.len(),
        files = view.files.len(),
        selected = view.selection.len(),
        "view updated"
    );
    for file in &view.files {
        info!(name = %file.name, size = file.size, mime = %file.mime_type, "  file");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), EngineError> {
    init_logging();
    // Keep demo state out of the user's real config dir unless one is chosen explicitly.
    if std::env::var_os(CONFIG_DIR_ENV).is_none() {
        std::env::set_var(CONFIG_DIR_ENV, std::env::temp_dir().join("vault-engine-demo"));
    }

    let config = EngineConfig::load().unwrap_or_else(|err| {
        warn!("{err}, falling back to defaults");
        EngineConfig::default()
    });
    let (vault, notifications) = MemoryVault::new();
    seed(&vault)?;

    let mut client = VaultClient::new(vault, config);
    let mut uploads = client.subscribe_uploads();
    client.open().await?;
    log_view(&client.view());

    if let Err(err) = client.authenticate(&Credential::Pin("0000".into())).await {
        info!("first attempt: {err}");
    }
    client.authenticate(&Credential::Pin(DEMO_PIN.into())).await?;

    let Some(docs) = client.view().folders.iter().find(|folder| folder.name == "Documents").cloned() else {
        return Err(EngineError::InvalidTree("Documents folder missing".to_string()));
    };
    client.navigate(Some(&docs.id)).await?;

    let mut criteria = load_view_preferences();
    criteria.sort_field = SortField::Name;
    criteria.direction = SortDirection::Ascending;
    client.set_criteria(criteria.clone());
    log_view(&client.view());
    if let Err(err) = save_view_preferences(&criteria) {
        warn!("could not persist view preferences: {err}");
    }

    let order = client.view_order().clone();
    if let (Some(first), Some(last)) = (order.files.first(), order.files.last()) {
        client.select(ItemRef::File(first.clone()), SelectMode::Replace);
        client.select(ItemRef::File(last.clone()), SelectMode::Range);
    }
    info!(selected = client.selection().len(), "range selected");

    let source = std::env::temp_dir().join("vault-engine-demo.txt");
    if let Err(err) = std::fs::write(&source, b"demo payload") {
        warn!("could not write demo payload: {err}");
    }
    let handle = client.upload(Path::new(&source), Some(&docs.id)).await?;
    let token = handle.token().clone();
    client
        .remote()
        .report_progress(&token, 6)
        .map_err(|err| EngineError::remote("report-progress", err))?;
    client
        .remote()
        .finish_upload(&token)
        .map_err(|err| EngineError::remote("finish-upload", err))?;

    let session_secs = client.config().default_session_secs.min(8);
    client
        .run(notifications, tokio::time::sleep(Duration::from_secs(session_secs)))
        .await;

    while let Ok(event) = uploads.try_recv() {
        if let UploadEvent::Finished { outcome, .. } = event {
            info!(?outcome, "upload finished");
        }
    }
    log_view(&client.view());
    info!(state = ?client.auth_state(), "demo finished");
    Ok(())
}
