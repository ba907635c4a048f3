//! Share probe: connects to an SMB share, lists its media and checks each file's header.
//!
//! Usage:
//!   mediasort-probe <address> <share/path> [username]
//!   mediasort-probe            (reuses the last remembered connection)
//!
//! Environment variables:
//!   MEDIASORT_SECRET - Password. Without it the secret comes from the OS keyring.
//!   RUST_LOG         - Log filter (default: info)

use log::{error, info, warn};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use mediasort_core::config::{HEADER_PROBE_LEN, config_dir, load_settings};
use mediasort_core::media::validate;
use mediasort_core::network::{RangeStream, ReadOutcome, RemoteShareClient, SmbTransport};
use mediasort_core::store::{KeyringSecretStore, LastConnection, load_last_connection};

fn target_from_args() -> Option<LastConnection> {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [address, path] => Some(LastConnection {
            address: address.clone(),
            username: String::new(),
            base_path: path.clone(),
        }),
        [address, path, username] => Some(LastConnection {
            address: address.clone(),
            username: username.clone(),
            base_path: path.clone(),
        }),
        [] => config_dir().and_then(|dir| load_last_connection(&dir)),
        _ => None,
    }
}

fn secret_for(target: &LastConnection) -> String {
    if target.username.is_empty() {
        return String::new();
    }
    if let Ok(secret) = env::var("MEDIASORT_SECRET") {
        return secret;
    }
    match target.credentials(&KeyringSecretStore::default()) {
        Ok(credentials) => credentials.secret,
        Err(e) => {
            warn!("No secret for {}: {}", target.account(), e);
            String::new()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let Some(target) = target_from_args() else {
        error!("Usage: mediasort-probe <address> <share/path> [username]");
        return ExitCode::from(2);
    };
    let settings = load_settings();
    let client = Arc::new(RemoteShareClient::new(SmbTransport, settings.clone()));

    if !client
        .connect(&target.address, &target.username, &secret_for(&target))
        .await
    {
        error!("Couldn't connect to {}", target.address);
        return ExitCode::FAILURE;
    }

    let listing = client
        .list_media_files(
            &target.address,
            &target.base_path,
            settings.include_video,
            settings.max_video_size_mb,
            settings.max_results,
        )
        .await;
    if let Some(message) = &listing.error_message {
        error!("Listing failed: {}", message);
        client.disconnect().await;
        return ExitCode::FAILURE;
    }
    if let Some(warning) = &listing.warning_message {
        warn!("{}", warning);
    }

    let mut stream = RangeStream::new(Arc::clone(&client));
    let mut damaged = 0;
    for file in &listing.files {
        let mut header = vec![0u8; HEADER_PROBE_LEN];
        let mut filled = 0;
        match stream.open(&file.locator, 0, Some(HEADER_PROBE_LEN as u64)).await {
            Ok(_) => {
                while let Ok(ReadOutcome::Bytes(n)) = stream.read(&mut header, filled, HEADER_PROBE_LEN).await {
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
            }
            Err(e) => warn!("{}: {}", file.name, e),
        }
        let result = validate(&file.name, &header[..filled], file.size);
        if result.is_valid {
            info!("ok       {} ({} bytes)", file.name, file.size);
        } else {
            damaged += 1;
            warn!(
                "damaged  {}: {}",
                file.name,
                result.error_details.as_deref().unwrap_or("bad header")
            );
        }
    }
    stream.close().await;
    info!(
        "{} media files, {} damaged, {} bytes read",
        listing.files.len(),
        damaged,
        stream.bytes_transferred()
    );

    client.disconnect().await;
    ExitCode::SUCCESS
}
