use std::{collections::BTreeMap, fmt, fs::File, path::PathBuf};

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::Deserialize;
use thiserror::Error;

pub const ENV_PREFIX: &str = "AWS_";

pub const VAR_KEY_PAIR: &str = "AWS_KEY_PAIR";
pub const VAR_KEY_FILENAME: &str = "AWS_KEY_FILENAME";
pub const VAR_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const VAR_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";
const DEFAULT_AMI: &str = "ami-c7d092f7";
const DEFAULT_REGION: &str = "us-west-2";
const DEFAULT_INSTANCE_NAME: &str = "data-platform";
const DEFAULT_SECURITY_GROUP: &str = "data-platform";
const DEFAULT_SSH_USER: &str = "centos";
const DEFAULT_VOLUME_SIZE: i32 = 120;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the following environment variables must be set: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] figment::Error),

    #[error("key file {} is not readable: {source}", path.display())]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Everything the environment may say, before defaults and validation.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default, deserialize_with = "text")]
    instance_type: Option<String>,
    #[serde(default, deserialize_with = "text")]
    key_pair: Option<String>,
    #[serde(default, deserialize_with = "text")]
    ami: Option<String>,
    #[serde(default, deserialize_with = "text")]
    key_filename: Option<String>,
    #[serde(default, deserialize_with = "text")]
    access_key_id: Option<String>,
    #[serde(default, deserialize_with = "text")]
    secret_access_key: Option<String>,
    #[serde(default, deserialize_with = "text")]
    session_token: Option<String>,
    #[serde(default, deserialize_with = "text")]
    region: Option<String>,
    #[serde(default, deserialize_with = "text")]
    instance_name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    security_group: Option<String>,
    #[serde(default, deserialize_with = "text")]
    ssh_user: Option<String>,
    #[serde(default, deserialize_with = "number")]
    volume_size: Option<i32>,
}

/// Any scalar as its text, so `AWS_KEY_PAIR=2024` is a name and not a number
struct TextVisitor;

impl<'de> Visitor<'de> for TextVisitor {
    type Value = Option<String>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string, number or boolean")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(TextVisitor)
    }
}

fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    d.deserialize_option(TextVisitor)
}

/// A whole number given either as a number or as its text
struct NumberVisitor;

impl<'de> Visitor<'de> for NumberVisitor {
    type Value = Option<i32>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a whole number")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        i32::try_from(v)
            .map(Some)
            .map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i32::try_from(v)
            .map(Some)
            .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match v.trim() {
            "" => Ok(None),
            n => n
                .parse::<i32>()
                .map(Some)
                .map_err(|_| E::invalid_value(Unexpected::Str(v), &self)),
        }
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(NumberVisitor)
    }
}

fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    d.deserialize_option(NumberVisitor)
}

/// Settings for the one box this tool manages, assembled once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxConfig {
    pub instance_type: String,
    pub key_pair: String,
    pub ami: String,
    pub key_filename: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
    pub instance_name: String,
    pub security_group: String,
    pub ssh_user: String,
    pub volume_size: i32,
}

impl fmt::Display for BoxConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "CONFIG ]---------------------------\n\
             Name:          {}\n\
             Region:        {}\n\
             Instance Type: {}\n\
             AMI:           {}\n\
             Key Pair:      {}\n\
             Key File:      {}\n\
             SSH User:      {}\n\
             Sec Group:     {}\n\
             Volume:        {} GiB\n\
             Access Key Id: {}",
            self.instance_name,
            self.region,
            self.instance_type,
            self.ami,
            self.key_pair,
            self.key_filename,
            self.ssh_user,
            self.security_group,
            self.volume_size,
            self.access_key_id,
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn or_default(value: Option<String>, default: &str) -> String {
    non_empty(value).unwrap_or_else(|| default.to_string())
}

fn required(value: Option<String>, var: &'static str, missing: &mut Vec<&'static str>) -> String {
    match non_empty(value) {
        Some(v) => v,
        None => {
            missing.push(var);
            String::new()
        }
    }
}

impl BoxConfig {
    /// Reads every `AWS_*` variable from the process environment. Values are
    /// kept exactly as written, so `AWS_INSTANCE_NAME=007` stays `007`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: BTreeMap<String, String> = Env::prefixed(ENV_PREFIX)
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), value))
            .collect();

        BoxConfig::from_figment(Figment::new().merge(Serialized::defaults(vars)))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let raw: RawConfig = figment.extract()?;

        let mut missing = Vec::new();
        let key_pair = required(raw.key_pair, VAR_KEY_PAIR, &mut missing);
        let key_filename = required(raw.key_filename, VAR_KEY_FILENAME, &mut missing);
        let access_key_id = required(raw.access_key_id, VAR_ACCESS_KEY_ID, &mut missing);
        let secret_access_key =
            required(raw.secret_access_key, VAR_SECRET_ACCESS_KEY, &mut missing);

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        Ok(BoxConfig {
            instance_type: or_default(raw.instance_type, DEFAULT_INSTANCE_TYPE),
            key_pair,
            ami: or_default(raw.ami, DEFAULT_AMI),
            key_filename,
            access_key_id,
            secret_access_key,
            session_token: non_empty(raw.session_token),
            region: or_default(raw.region, DEFAULT_REGION),
            instance_name: or_default(raw.instance_name, DEFAULT_INSTANCE_NAME),
            security_group: or_default(raw.security_group, DEFAULT_SECURITY_GROUP),
            ssh_user: or_default(raw.ssh_user, DEFAULT_SSH_USER),
            volume_size: raw.volume_size.unwrap_or(DEFAULT_VOLUME_SIZE),
        })
    }

    pub fn private_key_file(&self) -> PathBuf {
        PathBuf::from(&self.key_filename)
    }

    /// SSH needs the private key on disk, so fail early with its path if it
    /// cannot be opened.
    pub fn check_key_file(&self) -> Result<PathBuf, ConfigError> {
        let path = self.private_key_file();
        match File::open(&path) {
            Ok(_) => Ok(path),
            Err(source) => Err(ConfigError::KeyFile { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Format, Toml};

    const REQUIRED_ONLY: &str = r#"
        key_pair = "my-pair"
        key_filename = "/home/me/.ssh/my-pair.pem"
        access_key_id = "AKIAEXAMPLE"
        secret_access_key = "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY"
    "#;

    fn from_toml(toml: &str) -> Result<BoxConfig, ConfigError> {
        BoxConfig::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    #[test]
    fn test_defaults_when_only_required_set() {
        let bc = from_toml(REQUIRED_ONLY).unwrap();
        assert_eq!(bc.instance_type, "t2.micro");
        assert_eq!(bc.ami, "ami-c7d092f7");
        assert_eq!(bc.region, "us-west-2");
        assert_eq!(bc.instance_name, "data-platform");
        assert_eq!(bc.security_group, "data-platform");
        assert_eq!(bc.ssh_user, "centos");
        assert_eq!(bc.volume_size, 120);
        assert_eq!(bc.session_token, None);

        assert_eq!(bc.key_pair, "my-pair");
        assert_eq!(bc.key_filename, "/home/me/.ssh/my-pair.pem");
        assert_eq!(bc.access_key_id, "AKIAEXAMPLE");
    }

    #[test]
    fn test_missing_required_are_all_named() {
        let err = from_toml("region = \"eu-west-1\"").unwrap_err();
        match err {
            ConfigError::Missing(vars) => assert_eq!(
                vars,
                vec![
                    "AWS_KEY_PAIR",
                    "AWS_KEY_FILENAME",
                    "AWS_ACCESS_KEY_ID",
                    "AWS_SECRET_ACCESS_KEY"
                ]
            ),
            other => panic!("expected missing vars, got {:?}", other),
        }
    }

    #[test]
    fn test_single_missing_variable_is_named_in_message() {
        let toml = r#"
            key_pair = "my-pair"
            key_filename = "/tmp/key.pem"
            access_key_id = "AKIAEXAMPLE"
        "#;
        let err = from_toml(toml).unwrap_err();
        assert_eq!(
            err.to_string(),
            "the following environment variables must be set: AWS_SECRET_ACCESS_KEY"
        );
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let toml = format!("{}\nkey_pair = \"  \"", REQUIRED_ONLY.replace("key_pair = \"my-pair\"", ""));
        let err = from_toml(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref vars) if vars == &vec!["AWS_KEY_PAIR"]));
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let toml = format!(
            "{}\ninstance_type = \"m5.large\"\nami = \"ami-0123\"\nregion = \"eu-central-1\"\nvolume_size = 40\nssh_user = \"rocky\"",
            REQUIRED_ONLY
        );
        let bc = from_toml(&toml).unwrap();
        assert_eq!(bc.instance_type, "m5.large");
        assert_eq!(bc.ami, "ami-0123");
        assert_eq!(bc.region, "eu-central-1");
        assert_eq!(bc.volume_size, 40);
        assert_eq!(bc.ssh_user, "rocky");
    }

    #[test]
    fn test_invalid_volume_size_is_rejected() {
        let toml = format!("{}\nvolume_size = \"lots\"", REQUIRED_ONLY);
        assert!(matches!(from_toml(&toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_reads_prefixed_environment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("AWS_INSTANCE_TYPE", "t3.small");
            jail.set_env("AWS_KEY_PAIR", "ops");
            jail.set_env("AWS_AMI", "ami-feedbeef");
            jail.set_env("AWS_KEY_FILENAME", "/keys/ops.pem");
            jail.set_env("AWS_ACCESS_KEY_ID", "AKIAJAIL");
            jail.set_env("AWS_SECRET_ACCESS_KEY", "jailsecret");
            jail.set_env("AWS_SESSION_TOKEN", "");
            jail.set_env("AWS_REGION", "ap-southeast-2");
            jail.set_env("AWS_INSTANCE_NAME", "scratch");
            jail.set_env("AWS_SECURITY_GROUP", "scratch-ssh");
            jail.set_env("AWS_SSH_USER", "ec2-user");
            jail.set_env("AWS_VOLUME_SIZE", "64");

            let bc = BoxConfig::from_env().map_err(|e| e.to_string())?;
            assert_eq!(bc.instance_type, "t3.small");
            assert_eq!(bc.key_pair, "ops");
            assert_eq!(bc.ami, "ami-feedbeef");
            assert_eq!(bc.key_filename, "/keys/ops.pem");
            assert_eq!(bc.access_key_id, "AKIAJAIL");
            assert_eq!(bc.secret_access_key, "jailsecret");
            assert_eq!(bc.session_token, None);
            assert_eq!(bc.region, "ap-southeast-2");
            assert_eq!(bc.instance_name, "scratch");
            assert_eq!(bc.security_group, "scratch-ssh");
            assert_eq!(bc.ssh_user, "ec2-user");
            assert_eq!(bc.volume_size, 64);
            Ok(())
        });
    }

    #[test]
    fn test_env_values_stay_text() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("AWS_KEY_PAIR", "2024");
            jail.set_env("AWS_KEY_FILENAME", "/keys/2024.pem");
            jail.set_env("AWS_ACCESS_KEY_ID", "AKIAJAIL");
            jail.set_env("AWS_SECRET_ACCESS_KEY", "12345");
            jail.set_env("AWS_INSTANCE_NAME", "007");
            jail.set_env("AWS_SSH_USER", "true");
            jail.set_env("AWS_SECURITY_GROUP", "1.50");
            jail.set_env("AWS_VOLUME_SIZE", "80");

            let bc = BoxConfig::from_env().map_err(|e| e.to_string())?;
            assert_eq!(bc.key_pair, "2024");
            assert_eq!(bc.secret_access_key, "12345");
            assert_eq!(bc.instance_name, "007");
            assert_eq!(bc.ssh_user, "true");
            assert_eq!(bc.security_group, "1.50");
            assert_eq!(bc.volume_size, 80);
            Ok(())
        });
    }

    #[test]
    fn test_env_volume_size_must_be_a_number() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("AWS_KEY_PAIR", "ops");
            jail.set_env("AWS_KEY_FILENAME", "/keys/ops.pem");
            jail.set_env("AWS_ACCESS_KEY_ID", "AKIAJAIL");
            jail.set_env("AWS_SECRET_ACCESS_KEY", "jailsecret");
            jail.set_env("AWS_VOLUME_SIZE", "lots");

            assert!(matches!(BoxConfig::from_env(), Err(ConfigError::Invalid(_))));
            Ok(())
        });
    }

    #[test]
    fn test_scalar_values_are_read_as_text() {
        let toml = r#"
            key_pair = 2024
            key_filename = "/keys/ops.pem"
            access_key_id = "AKIAEXAMPLE"
            secret_access_key = "secret"
            ssh_user = true
        "#;
        let bc = from_toml(toml).unwrap();
        assert_eq!(bc.key_pair, "2024");
        assert_eq!(bc.ssh_user, "true");
    }

    #[test]
    fn test_display_hides_secrets() {
        let mut bc = from_toml(REQUIRED_ONLY).unwrap();
        bc.session_token = Some("tok-123".to_string());
        let shown = bc.to_string();
        assert!(shown.contains("my-pair"));
        assert!(!shown.contains("wJalrXUtnFEMI"));
        assert!(!shown.contains("tok-123"));
    }

    #[test]
    fn test_key_file_must_be_readable() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let mut bc = from_toml(REQUIRED_ONLY).unwrap();

        bc.key_filename = key.path().display().to_string();
        assert_eq!(bc.check_key_file().unwrap(), key.path());

        bc.key_filename = "/definitely/not/here.pem".to_string();
        let err = bc.check_key_file().unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.pem"));
    }
}
