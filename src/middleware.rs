use axum::{
    extract::MatchedPath,
    http::{Request, Uri},
};
use tower_http::trace::MakeSpan;
use tracing::Span;

/// Request span tagged with the serving instance, so logs from several
/// instances behind one endpoint can be told apart.
#[derive(Clone)]
pub struct InstanceRequestSpan {
    env: String,
    instance_id: String,
}

impl InstanceRequestSpan {
    pub fn new(env: &str, instance_id: &str) -> Self {
        Self {
            env: env.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

impl<B> MakeSpan<B> for InstanceRequestSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let matched_path = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched_path| matched_path.as_str());

        tracing::info_span!(
            "request",
            env = %self.env,
            instance_id = %self.instance_id,
            method = %req.method(),
            path = logged_path(req.uri()),
            matched_path,
        )
    }
}

/// The query carries the `request_id` ownership token and is never logged.
fn logged_path(uri: &Uri) -> &str {
    uri.path()
}
