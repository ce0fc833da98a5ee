// Copyright 2022 Paolo Galeone <nessuno@nerdz.eu>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use std::string::String;

use s3tree::batch::Batch;
use s3tree::config::{Config, DEFAULT_PART_SIZE};
use s3tree::observer::LogObserver;
use s3tree::transfer;

use s3tree::remotes::aws::AwsBucket;
use s3tree::remotes::localhost::Localhost;
use s3tree::remotes::remote::ObjectStore;

use log::*;
use structopt::StructOpt;

use tokio::sync::watch;

#[derive(StructOpt, Debug)]
#[structopt()]
struct Opt {
    /// Silence all output
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,
    /// Verbose mode (-v, -vv, -vvv, etc)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,
    /// Configuration file. Defaults to $CONF_FILE, then config.toml
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    config: Option<PathBuf>,
    /// Upload a single file to a remote, instead of running the uploads
    #[structopt(long = "put", number_of_values = 3, value_names = &["REMOTE", "FILE", "KEY"])]
    put: Option<Vec<String>>,
    /// Download a single object from a remote, instead of running the uploads
    #[structopt(long = "get", number_of_values = 3, value_names = &["REMOTE", "KEY", "DEST"])]
    get: Option<Vec<String>>,
    /// Uploads to run, by name. All the configured ones when empty
    uploads: Vec<String>,
}

fn remote<'a>(
    remotes: &'a HashMap<String, Arc<dyn ObjectStore>>,
    name: &str,
) -> Result<&'a dyn ObjectStore, i32> {
    match remotes.get(name) {
        Some(store) => Ok(store.as_ref()),
        None => {
            error!(
                "Remote {} not available in the configured remotes: {:?}",
                name,
                remotes.keys()
            );
            Err(-1)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), i32> {
    let opt = Opt::from_args();
    if let Err(error) = stderrlog::new()
        .module(module_path!())
        .module("s3tree")
        .quiet(opt.quiet)
        .verbosity(opt.verbose)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
    {
        eprintln!("Unable to initialize the logger: {}", error);
        return Err(-1);
    }

    let path = match opt.config {
        Some(path) => path,
        None => PathBuf::from(env::var("CONF_FILE").unwrap_or_else(|_| "config.toml".to_string())),
    };

    if !path.exists() {
        error!("The configuration file {:?} doesn't exist.", path);
        return Err(-1);
    }

    let config = match Config::new(&path).await {
        Ok(config) => config,
        Err(error) => {
            error!("Config error: {}", error);
            return Err(-1);
        }
    };

    let mut remotes: HashMap<String, Arc<dyn ObjectStore>> = HashMap::new();

    match config.aws {
        Some(aws) => {
            for (bucket_name, bucket_config) in aws {
                match AwsBucket::new(bucket_config, &bucket_name).await {
                    Ok(bucket) => {
                        remotes.insert(format!("aws.{}", bucket_name), Arc::new(bucket));
                        info!("Remote aws.{} configured", bucket_name);
                    }
                    Err(error) => {
                        error!("Remote aws.{}: {}", bucket_name, error);
                        return Err(-1);
                    }
                }
            }
        }
        None => warn!("No AWS cloud configured."),
    }

    match config.localhost {
        Some(host) => {
            for (name, localhost_config) in host {
                match Localhost::new(localhost_config, &name) {
                    Ok(localhost) => {
                        remotes.insert(format!("localhost.{}", name), Arc::new(localhost));
                        info!("Remote localhost.{} configured", name);
                    }
                    Err(error) => {
                        error!("Remote localhost.{}: {}", name, error);
                        return Err(-1);
                    }
                }
            }
        }
        None => warn!("No localhost remotes configured."),
    }

    if let Some(put) = &opt.put {
        let store = remote(&remotes, &put[0])?;
        let path = PathBuf::from(&put[1]);
        return match transfer::upload_file(store, &path, &put[2], DEFAULT_PART_SIZE).await {
            Ok(written) => {
                info!("Uploaded {} to {}:{} ({} bytes)", path.display(), put[0], put[2], written);
                Ok(())
            }
            Err(error) => {
                error!("Upload of {} failed: {}", path.display(), error);
                Err(-1)
            }
        };
    }

    if let Some(get) = &opt.get {
        let store = remote(&remotes, &get[0])?;
        let dest = PathBuf::from(&get[2]);
        return match transfer::download(store, &get[1], &dest).await {
            Ok(written) => {
                info!("Downloaded {}:{} to {} ({} bytes)", get[0], get[1], dest.display(), written);
                Ok(())
            }
            Err(error) => {
                error!("Download of {} failed: {}", get[1], error);
                Err(-1)
            }
        };
    }

    let mut names: Vec<String> = if opt.uploads.is_empty() {
        config.upload.keys().cloned().collect()
    } else {
        opt.uploads.clone()
    };
    names.sort();

    for name in &names {
        let upload = match config.upload.get(name) {
            Some(upload) => upload,
            None => {
                error!(
                    "Upload {} not found in the configured uploads: {:?}",
                    name,
                    config.upload.keys()
                );
                return Err(-1);
            }
        };
        if !remotes.contains_key(&upload.r#where) {
            error!(
                "Upload {}. Invalid where: {}, not available in the configured remotes: {:?}",
                name,
                upload.r#where,
                remotes.keys()
            );
            return Err(-1);
        }
    }

    let (cancel, cancelled) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, no new uploads will be started");
            cancel.send_replace(true);
        }
    });

    let mut failures = 0;
    for name in &names {
        let upload = &config.upload[name];
        let store = remotes[&upload.r#where].clone();
        let batch = Batch::new(store, upload.batch_config())
            .with_observer(Arc::new(LogObserver::new(name)));

        let report = match batch.run(cancelled.clone()).await {
            Ok(report) => report,
            Err(error) => {
                println!("[{}] {}", name, error);
                failures += 1;
                continue;
            }
        };
        println!("[{}] {}", name, report);
        if !report.is_success() {
            failures += 1;
        }

        if upload.verify && report.succeeded().next().is_some() {
            let missing = batch.verify(&report).await;
            if missing.is_empty() {
                info!("[{}] All uploaded objects are present on {}", name, report.store);
            } else {
                for key in &missing {
                    println!("[{}]   MISSING {}", name, key);
                }
                failures += 1;
            }
        }

        if *cancelled.borrow() {
            break;
        }
    }

    if failures > 0 {
        return Err(-1);
    }
    Ok(())
}
