use std::{env, fmt::Display, str::FromStr};

use crate::{flatten, message, Error};

/**
Crate-wide configuration.

Each component keeps its own configuration; this type just gathers them
so they can be resolved in one place at process start and handed to
[`crate::build`].
*/
#[derive(Debug, Default, Clone)]
pub struct Config {
    pub message: message::Config,
    pub flatten: flatten::Config,
}

impl Config {
    /**
    Read configuration from the environment.

    `GELF_HOST` sets the default hostname, falling back to the
    `HOSTNAME` variable commonly exported by shells; when neither is
    set the hostname stays empty and messages still encode.
    `GELF_MAX_DEPTH` sets the flattening recursion limit.
    */
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Config::default();

        read_environment(&mut config.message.host, "GELF_HOST")?;
        if config.message.host.is_empty() {
            read_environment(&mut config.message.host, "HOSTNAME")?;
        }

        read_environment(&mut config.flatten.max_depth, "GELF_MAX_DEPTH")?;

        Ok(config)
    }
}

fn read_environment<T>(into: &mut T, name: impl AsRef<str>) -> Result<(), Error>
where
    T: FromStr,
    T::Err: Display,
{
    let name = name.as_ref();

    match env::var(name) {
        // The environment variable exists, but is empty
        Ok(ref v) if v == "" => Ok(()),
        // The environment variable does not exist
        Err(env::VarError::NotPresent) => Ok(()),
        // The environment variable is invalid
        Err(e) => Err(Error::Config(format!("failed to read {}: {}", name, e))),
        // The environment variable has a value
        Ok(v) => {
            *into = v
                .parse()
                .map_err(|e: T::Err| Error::Config(format!("invalid value for {}: {}", name, e)))?;

            Ok(())
        }
    }
}
