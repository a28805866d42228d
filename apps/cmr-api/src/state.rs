use std::sync::Arc;

use cmr_service::CmrService;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<CmrService>,
}
impl AppState {
	pub fn new(config: cmr_config::Config) -> color_eyre::Result<Self> {
		let service = CmrService::new(config)?;

		Ok(Self { service: Arc::new(service) })
	}
}
