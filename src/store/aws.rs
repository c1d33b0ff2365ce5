//! AWS backends: SSM Parameter Store, STS identity and KMS
//!
//! The SDK is async; every call blocks on a runtime owned by the backend so
//! the rest of the crate stays synchronous.

use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_kms::primitives::Blob;
use aws_sdk_ssm::error::DisplayErrorContext;
use aws_sdk_ssm::types::{ParameterStringFilter, ParameterType as SsmParameterType};
use aws_types::region::Region;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::runtime::Runtime;
use tracing::debug;

use super::{
    Cipher, GetParametersOutput, ParameterRecord, ParameterStore, PathQuery, PutRequest,
    RecordPage,
};
use crate::config::AwsConfig;
use crate::types::ParameterType;

/// Build the store and cipher from one shared SDK configuration
pub(super) fn connect(settings: &AwsConfig) -> Result<(AwsStore, KmsCipher)> {
    let runtime = Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?,
    );
    let shared_config = runtime.block_on(load_config(settings));
    debug!(region = ?shared_config.region(), "loaded AWS configuration");

    let store = AwsStore {
        ssm: aws_sdk_ssm::Client::new(&shared_config),
        sts: aws_sdk_sts::Client::new(&shared_config),
        region: shared_config.region().map(|r| r.to_string()),
        runtime: Arc::clone(&runtime),
    };
    let cipher = KmsCipher {
        kms: aws_sdk_kms::Client::new(&shared_config),
        runtime,
    };
    Ok((store, cipher))
}

async fn load_config(settings: &AwsConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(profile) = &settings.profile {
        loader = loader.profile_name(profile);
    }

    if let Some(region) = settings.region.clone() {
        loader = loader.region(Region::new(region));
    }

    if let Some(endpoint_url) = &settings.endpoint_url {
        loader = loader.endpoint_url(endpoint_url.clone());
    }

    loader.load().await
}

fn sdk_error<E: std::error::Error>(err: E) -> anyhow::Error {
    anyhow!("{}", DisplayErrorContext(err))
}

fn parse_type(kind: Option<&SsmParameterType>) -> Result<ParameterType> {
    let kind = kind.ok_or_else(|| anyhow!("record without a type"))?;
    kind.as_str()
        .parse()
        .map_err(|e| anyhow!("{}", e))
}

/// Latest-version reads carry no key, pattern or description
fn parameter_record(p: &aws_sdk_ssm::types::Parameter) -> Result<ParameterRecord> {
    Ok(ParameterRecord {
        name: p.name().unwrap_or_default().to_string(),
        kind: parse_type(p.r#type())?,
        value: p.value().unwrap_or_default().to_string(),
        key_id: None,
        allowed_pattern: None,
        description: None,
        version: p.version(),
        last_modified_date: p.last_modified_date().map(|d| d.secs()),
        last_modified_user: None,
    })
}

pub struct AwsStore {
    ssm: aws_sdk_ssm::Client,
    sts: aws_sdk_sts::Client,
    region: Option<String>,
    runtime: Arc<Runtime>,
}

impl AwsStore {
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl std::fmt::Debug for AwsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsStore")
            .field("region", &self.region)
            .finish()
    }
}

impl ParameterStore for AwsStore {
    fn name(&self) -> &str {
        "aws"
    }

    fn put_parameter(&self, request: &PutRequest) -> Result<()> {
        self.block_on(
            self.ssm
                .put_parameter()
                .name(&request.name)
                .r#type(SsmParameterType::from(request.kind.as_str()))
                .value(&request.value)
                .set_allowed_pattern(request.allowed_pattern.clone())
                .set_description(request.description.clone())
                .set_key_id(request.key_id.clone())
                .overwrite(request.overwrite)
                .send(),
        )
        .map_err(sdk_error)?;
        Ok(())
    }

    fn get_parameters(
        &self,
        names: &[String],
        with_decryption: bool,
    ) -> Result<GetParametersOutput> {
        let output = self
            .block_on(
                self.ssm
                    .get_parameters()
                    .set_names(Some(names.to_vec()))
                    .with_decryption(with_decryption)
                    .send(),
            )
            .map_err(sdk_error)?;

        let records = output
            .parameters()
            .iter()
            .map(parameter_record)
            .collect::<Result<Vec<_>>>()?;

        Ok(GetParametersOutput {
            records,
            invalid: output.invalid_parameters().to_vec(),
        })
    }

    fn get_parameters_by_path(
        &self,
        query: &PathQuery,
        next_token: Option<&str>,
    ) -> Result<RecordPage> {
        let filters = query
            .filters
            .iter()
            .map(|f| {
                ParameterStringFilter::builder()
                    .key(&f.key)
                    .set_option(f.option.clone())
                    .set_values(Some(f.values.clone()))
                    .build()
                    .map_err(sdk_error)
            })
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .block_on(
                self.ssm
                    .get_parameters_by_path()
                    .path(&query.path)
                    .recursive(query.recursive)
                    .with_decryption(query.with_decryption)
                    .set_parameter_filters((!filters.is_empty()).then_some(filters))
                    .set_next_token(next_token.map(str::to_string))
                    .send(),
            )
            .map_err(sdk_error)?;

        let records = output
            .parameters()
            .iter()
            .map(parameter_record)
            .collect::<Result<Vec<_>>>()?;

        Ok(RecordPage {
            records,
            next_token: output.next_token().map(str::to_string),
        })
    }

    fn get_parameter_history(
        &self,
        name: &str,
        with_decryption: bool,
        next_token: Option<&str>,
    ) -> Result<RecordPage> {
        let sent = self.block_on(
            self.ssm
                .get_parameter_history()
                .name(name)
                .with_decryption(with_decryption)
                .set_next_token(next_token.map(str::to_string))
                .send(),
        );
        let output = match sent {
            Ok(output) => output,
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_parameter_not_found()) =>
            {
                return Ok(RecordPage::default());
            }
            Err(err) => return Err(sdk_error(err)),
        };

        let records = output
            .parameters()
            .iter()
            .map(|p| {
                Ok(ParameterRecord {
                    name: p.name().unwrap_or_default().to_string(),
                    kind: parse_type(p.r#type())?,
                    value: p.value().unwrap_or_default().to_string(),
                    key_id: p.key_id().map(str::to_string),
                    allowed_pattern: p.allowed_pattern().map(str::to_string),
                    description: p.description().map(str::to_string),
                    version: p.version(),
                    last_modified_date: p.last_modified_date().map(|d| d.secs()),
                    last_modified_user: p.last_modified_user().map(str::to_string),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RecordPage {
            records,
            next_token: output.next_token().map(str::to_string),
        })
    }

    fn delete_parameters(&self, names: &[String]) -> Result<Vec<String>> {
        let output = self
            .block_on(
                self.ssm
                    .delete_parameters()
                    .set_names(Some(names.to_vec()))
                    .send(),
            )
            .map_err(sdk_error)?;
        Ok(output.invalid_parameters().to_vec())
    }

    fn region(&self) -> Result<String> {
        self.region
            .clone()
            .ok_or_else(|| anyhow!("no region configured (set AWS_REGION or --region)"))
    }

    fn account(&self) -> Result<String> {
        let output = self
            .block_on(self.sts.get_caller_identity().send())
            .map_err(sdk_error)?;
        output
            .account()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("caller identity has no account"))
    }
}

/// KMS encrypt/decrypt with base64 ciphertext
pub struct KmsCipher {
    kms: aws_sdk_kms::Client,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for KmsCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsCipher").finish_non_exhaustive()
    }
}

impl Cipher for KmsCipher {
    fn name(&self) -> &str {
        "kms"
    }

    fn encrypt(&self, plaintext: &str, key_id: &str) -> Result<String> {
        let output = self
            .runtime
            .block_on(
                self.kms
                    .encrypt()
                    .key_id(key_id)
                    .plaintext(Blob::new(plaintext.as_bytes()))
                    .send(),
            )
            .map_err(sdk_error)?;
        let blob = output
            .ciphertext_blob()
            .ok_or_else(|| anyhow!("KMS returned no ciphertext"))?;
        Ok(STANDARD.encode(blob.as_ref()))
    }

    /// The key is read from the ciphertext itself, so values encrypted
    /// under a different key than the parameter's still decrypt
    fn decrypt(&self, ciphertext: &str, _key_id: Option<&str>) -> Result<String> {
        let bytes = STANDARD
            .decode(ciphertext.trim())
            .context("ciphertext is not base64")?;
        let output = self
            .runtime
            .block_on(
                self.kms
                    .decrypt()
                    .ciphertext_blob(Blob::new(bytes))
                    .send(),
            )
            .map_err(sdk_error)?;
        let blob = output
            .plaintext()
            .ok_or_else(|| anyhow!("KMS returned no plaintext"))?;
        String::from_utf8(blob.as_ref().to_vec()).context("plaintext is not UTF-8")
    }
}
