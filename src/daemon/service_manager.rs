use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Platform service-manager capability (spec §4.1 ADDED): install/start/stop
/// the daemon as a real OS service instead of a foreground process, selected
/// at build time via `cfg(target_os = ...)` following the same
/// capability-interface-per-OS idiom the overlay's tunnel configurator uses.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn install(&self) -> Result<()>;
    async fn uninstall(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn is_installed(&self) -> Result<bool>;
}

pub fn platform_service_manager(binary_path: PathBuf) -> Box<dyn ServiceManager> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::SystemdUserService::new(binary_path))
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::LaunchdService::new(binary_path))
    }
    #[cfg(target_os = "windows")]
    {
        Box::new(windows::WindowsService::new(binary_path))
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use tokio::process::Command;

    const UNIT_NAME: &str = "goconnectd.service";

    fn unit_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".config/systemd/user"))
    }

    fn unit_path() -> Result<PathBuf> {
        Ok(unit_dir()?.join(UNIT_NAME))
    }

    fn unit_contents(binary_path: &std::path::Path) -> String {
        format!(
            "[Unit]\n\
             Description=GoConnect client daemon\n\
             After=network-online.target\n\
             Wants=network-online.target\n\
             \n\
             [Service]\n\
             ExecStart={} run\n\
             Restart=on-failure\n\
             RestartSec=2\n\
             \n\
             [Install]\n\
             WantedBy=default.target\n",
            binary_path.display()
        )
    }

    pub struct SystemdUserService {
        binary_path: PathBuf,
    }

    impl SystemdUserService {
        pub fn new(binary_path: PathBuf) -> Self {
            Self { binary_path }
        }

        async fn systemctl(&self, args: &[&str]) -> Result<()> {
            let status = Command::new("systemctl")
                .arg("--user")
                .args(args)
                .status()
                .await
                .context("failed to invoke systemctl --user")?;
            if !status.success() {
                anyhow::bail!("systemctl --user {:?} exited with {status}", args);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ServiceManager for SystemdUserService {
        async fn install(&self) -> Result<()> {
            let dir = unit_dir()?;
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
            tokio::fs::write(unit_path()?, unit_contents(&self.binary_path))
                .await
                .context("failed to write systemd user unit")?;
            self.systemctl(&["daemon-reload"]).await?;
            self.systemctl(&["enable", UNIT_NAME]).await
        }

        async fn uninstall(&self) -> Result<()> {
            let _ = self.systemctl(&["disable", UNIT_NAME]).await;
            let path = unit_path()?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err).context("failed to remove systemd user unit"),
            }
            self.systemctl(&["daemon-reload"]).await
        }

        async fn start(&self) -> Result<()> {
            self.systemctl(&["start", UNIT_NAME]).await
        }

        async fn stop(&self) -> Result<()> {
            self.systemctl(&["stop", UNIT_NAME]).await
        }

        async fn is_installed(&self) -> Result<bool> {
            Ok(unit_path()?.exists())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn unit_file_runs_the_binary_with_run_subcommand() {
            let rendered = unit_contents(std::path::Path::new("/usr/local/bin/goconnectd"));
            assert!(rendered.contains("ExecStart=/usr/local/bin/goconnectd run"));
            assert!(rendered.contains("Restart=on-failure"));
        }
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use tokio::process::Command;

    const LABEL: &str = "com.goconnect.daemon";

    fn plist_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(format!("Library/LaunchAgents/{LABEL}.plist")))
    }

    fn plist_contents(binary_path: &std::path::Path) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
             <plist version=\"1.0\">\n\
             <dict>\n\
             \t<key>Label</key><string>{LABEL}</string>\n\
             \t<key>ProgramArguments</key>\n\
             \t<array><string>{}</string><string>run</string></array>\n\
             \t<key>RunAtLoad</key><true/>\n\
             \t<key>KeepAlive</key><true/>\n\
             </dict>\n\
             </plist>\n",
            binary_path.display()
        )
    }

    pub struct LaunchdService {
        binary_path: PathBuf,
    }

    impl LaunchdService {
        pub fn new(binary_path: PathBuf) -> Self {
            Self { binary_path }
        }
    }

    #[async_trait]
    impl ServiceManager for LaunchdService {
        async fn install(&self) -> Result<()> {
            let path = plist_path()?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            tokio::fs::write(&path, plist_contents(&self.binary_path))
                .await
                .context("failed to write launchd plist")?;
            Command::new("launchctl")
                .arg("load")
                .arg("-w")
                .arg(&path)
                .status()
                .await
                .context("failed to invoke launchctl load")?;
            Ok(())
        }

        async fn uninstall(&self) -> Result<()> {
            let path = plist_path()?;
            let _ = Command::new("launchctl").arg("unload").arg(&path).status().await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err).context("failed to remove launchd plist"),
            }
        }

        async fn start(&self) -> Result<()> {
            Command::new("launchctl")
                .arg("start")
                .arg(LABEL)
                .status()
                .await
                .context("failed to invoke launchctl start")?;
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Command::new("launchctl")
                .arg("stop")
                .arg(LABEL)
                .status()
                .await
                .context("failed to invoke launchctl stop")?;
            Ok(())
        }

        async fn is_installed(&self) -> Result<bool> {
            Ok(plist_path()?.exists())
        }
    }
}

#[cfg(target_os = "windows")]
mod windows {
    use super::*;
    use windows_service::service::{
        ServiceAccess, ServiceErrorControl, ServiceInfo, ServiceStartType, ServiceType,
    };
    use windows_service::service_manager::{ServiceManagerAccess, ServiceManager as Scm};

    const SERVICE_NAME: &str = "GoConnectDaemon";

    pub struct WindowsService {
        binary_path: PathBuf,
    }

    impl WindowsService {
        pub fn new(binary_path: PathBuf) -> Self {
            Self { binary_path }
        }
    }

    #[async_trait]
    impl ServiceManager for WindowsService {
        async fn install(&self) -> Result<()> {
            let binary_path = self.binary_path.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let scm = Scm::local_computer(None::<&str>, ServiceManagerAccess::CREATE_SERVICE)
                    .context("failed to open Windows service control manager")?;
                let info = ServiceInfo {
                    name: SERVICE_NAME.into(),
                    display_name: "GoConnect Daemon".into(),
                    service_type: ServiceType::OWN_PROCESS,
                    start_type: ServiceStartType::AutoStart,
                    error_control: ServiceErrorControl::Normal,
                    executable_path: binary_path,
                    launch_arguments: vec!["run".into()],
                    dependencies: vec![],
                    account_name: None,
                    account_password: None,
                };
                scm.create_service(&info, ServiceAccess::empty())
                    .context("failed to create Windows service")?;
                Ok(())
            })
            .await
            .context("install task panicked")?
        }

        async fn uninstall(&self) -> Result<()> {
            tokio::task::spawn_blocking(|| -> Result<()> {
                let scm = Scm::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                    .context("failed to open Windows service control manager")?;
                let service = scm
                    .open_service(SERVICE_NAME, ServiceAccess::DELETE)
                    .context("failed to open Windows service")?;
                service.delete().context("failed to delete Windows service")?;
                Ok(())
            })
            .await
            .context("uninstall task panicked")?
        }

        async fn start(&self) -> Result<()> {
            tokio::task::spawn_blocking(|| -> Result<()> {
                let scm = Scm::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                    .context("failed to open Windows service control manager")?;
                let service = scm
                    .open_service(SERVICE_NAME, ServiceAccess::START)
                    .context("failed to open Windows service")?;
                service.start(&[] as &[&str]).context("failed to start Windows service")?;
                Ok(())
            })
            .await
            .context("start task panicked")?
        }

        async fn stop(&self) -> Result<()> {
            tokio::task::spawn_blocking(|| -> Result<()> {
                let scm = Scm::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                    .context("failed to open Windows service control manager")?;
                let service = scm
                    .open_service(SERVICE_NAME, ServiceAccess::STOP)
                    .context("failed to open Windows service")?;
                service.stop().context("failed to stop Windows service")?;
                Ok(())
            })
            .await
            .context("stop task panicked")?
        }

        async fn is_installed(&self) -> Result<bool> {
            tokio::task::spawn_blocking(|| -> Result<bool> {
                let scm = Scm::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                    .context("failed to open Windows service control manager")?;
                Ok(scm
                    .open_service(SERVICE_NAME, ServiceAccess::QUERY_STATUS)
                    .is_ok())
            })
            .await
            .context("is_installed task panicked")?
        }
    }
}
