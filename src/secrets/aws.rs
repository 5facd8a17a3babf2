//! AWS Secrets Manager client.
//!
//! Uses the AWS SDK for Rust with the standard credential chain
//! (environment, instance profile, etc.)

use aws_sdk_secretsmanager::Client;

use super::{SecretError, SecretResult};

pub struct SecretsClient {
    client: Client,
}

impl SecretsClient {
    /// Build a client for the given region.
    ///
    /// `endpoint_url` overrides the service endpoint (localstack testing).
    pub async fn new(region: &str, endpoint_url: Option<&str>) -> Self {
        let aws_config = aws_config::from_env()
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = aws_sdk_secretsmanager::config::Builder::from(&aws_config);
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Fetch the raw string payload of a secret.
    pub async fn fetch(&self, name: &str) -> SecretResult<String> {
        match self.client.get_secret_value().secret_id(name).send().await {
            Ok(output) => {
                if let Some(secret_string) = output.secret_string() {
                    Ok(secret_string.to_string())
                } else if let Some(secret_binary) = output.secret_binary() {
                    String::from_utf8(secret_binary.clone().into_inner()).map_err(|e| {
                        SecretError::Malformed(
                            name.to_string(),
                            format!("binary payload is not valid UTF-8: {e}"),
                        )
                    })
                } else {
                    Err(SecretError::NotFound(name.to_string()))
                }
            }
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    Err(SecretError::NotFound(name.to_string()))
                } else {
                    Err(SecretError::Store(format!(
                        "failed to get secret '{name}': {service_error}"
                    )))
                }
            }
        }
    }
}
