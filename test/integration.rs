// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{FakeUnpacker, InstallFixture};

use anyhow::Result;
use pretty_assertions::assert_eq;
use retrostage::{
    autostart::{launch_line, AutostartFile},
    lock::LockError,
    manifest::{InstallManifest, ManifestFile, PartRecord, Stage},
    path::is_executable,
    state::{Decision, DecisionRequest, Phase},
    InstallOutcome, InstallerError,
};
use std::{
    fs::{create_dir_all, read, read_dir, write},
    path::Path,
};

fn listing(dir: &Path) -> Result<Vec<String>> {
    let mut names = read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();
    Ok(names)
}

#[tokio::test]
async fn fresh_install_runs_whole_pipeline() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let unpacker = FakeUnpacker::default();
    let installer = fixture.installer(fixture.transport(), unpacker.clone());
    let layout = installer.layout().clone();

    let assessment = installer.assess();
    assert_eq!(assessment.phase, Phase::Fresh);
    assert_eq!(assessment.request, None);

    let outcome = installer.install(None).await?;
    let InstallOutcome::Installed(report) = outcome else {
        panic!("expected installation");
    };

    let executable = layout.executable_path();
    assert_eq!(report.executable, executable);
    assert_eq!(report.pid, None);
    assert!(is_executable(&executable));
    assert_eq!(read(&executable)?, fixture.bundle_contents());
    assert_eq!(unpacker.calls(), 1);

    let expect = fixture
        .part_contents()
        .into_iter()
        .map(|(name, _)| fixture.profile.release.url_of(&name))
        .collect::<Vec<_>>();
    assert_eq!(installer.engine().transport().requests(), expect);

    for part in layout.part_paths() {
        assert!(!part.exists(), "{part:?} left behind");
    }
    assert!(!layout.bundle_path().exists());
    assert!(!layout.lock_path().exists());

    let script = AutostartFile::new(&fixture.profile.autostart.file);
    assert!(script.contains(&launch_line(&executable))?);

    let manifest = ManifestFile::new(layout.manifest_path()).load()?;
    assert_eq!(manifest.stage, Some(Stage::Complete));
    assert_eq!(installer.assess().phase, Phase::Complete);

    Ok(())
}

#[tokio::test]
async fn resume_with_combined_archive_skips_downloads_and_combine() -> Result<()> {
    let mut fixture = InstallFixture::new()?;
    fixture.profile.payload.keep_archive = true;
    let unpacker = FakeUnpacker::default();
    let installer = fixture.installer(fixture.transport(), unpacker.clone());
    let layout = installer.layout().clone();

    create_dir_all(layout.root())?;
    write(layout.bundle_path(), b"already combined")?;

    let assessment = installer.assess();
    assert_eq!(assessment.phase, Phase::Partial);
    assert_eq!(assessment.request, Some(DecisionRequest::ResumeOrRestart));

    let outcome = installer.install(Some(Decision::Resume)).await?;
    assert!(matches!(outcome, InstallOutcome::Installed(_)));

    assert!(installer.engine().transport().requests().is_empty());
    assert_eq!(read(layout.bundle_path())?, b"already combined");
    assert_eq!(read(layout.executable_path())?, b"already combined");
    assert_eq!(unpacker.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn complete_install_declined_changes_nothing() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let installer = fixture.installer(fixture.transport(), FakeUnpacker::default());
    installer.install(None).await?;

    let before = listing(fixture.root())?;
    let script_before = read(&fixture.profile.autostart.file)?;

    let assessment = installer.assess();
    assert_eq!(assessment.request, Some(DecisionRequest::Reinstall));
    for decision in [Some(Decision::Abort), None, Some(Decision::Resume)] {
        let outcome = installer.install(decision).await?;
        assert_eq!(outcome, InstallOutcome::Declined);
    }

    assert_eq!(listing(fixture.root())?, before);
    assert_eq!(read(&fixture.profile.autostart.file)?, script_before);
    assert!(is_executable(installer.layout().executable_path()));

    Ok(())
}

#[tokio::test]
async fn partial_install_without_answer_is_left_alone() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let installer = fixture.installer(fixture.transport(), FakeUnpacker::default());
    let first = installer.layout().part_paths()[0].clone();

    create_dir_all(fixture.root())?;
    write(&first, b"half")?;

    let outcome = installer.install(None).await?;
    assert_eq!(outcome, InstallOutcome::Declined);
    assert_eq!(read(&first)?, b"half");
    assert!(installer.engine().transport().requests().is_empty());

    Ok(())
}

#[tokio::test]
async fn restart_removes_artifacts_before_installing() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let installer = fixture.installer(fixture.transport(), FakeUnpacker::default());
    let layout = installer.layout().clone();

    let stale_staging = layout.root().join(".staging-old");
    create_dir_all(stale_staging.join("outer"))?;
    create_dir_all(layout.payload_dir())?;
    write(layout.payload_dir().join("stale.txt"), b"old")?;
    write(&layout.part_paths()[1], b"garbage")?;
    let mut manifest = InstallManifest::default();
    manifest.advance(Stage::Downloaded);
    ManifestFile::new(layout.manifest_path()).save(&manifest)?;

    let outcome = installer.install(Some(Decision::Restart)).await?;
    assert!(matches!(outcome, InstallOutcome::Installed(_)));

    assert!(!stale_staging.exists());
    assert!(!layout.payload_dir().join("stale.txt").exists());
    assert_eq!(installer.engine().transport().requests().len(), 3);
    assert_eq!(read(layout.executable_path())?, fixture.bundle_contents());

    Ok(())
}

#[tokio::test]
async fn failed_extraction_removes_debris() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let unpacker = FakeUnpacker::broken();
    let installer = fixture.installer(fixture.transport(), unpacker.clone());
    let layout = installer.layout().clone();

    let result = installer.install(None).await;
    assert!(matches!(result, Err(InstallerError::Archive(_))));
    assert_eq!(unpacker.calls(), 1);

    for part in layout.part_paths() {
        assert!(!part.exists(), "{part:?} left behind");
    }
    assert!(!layout.bundle_path().exists());
    assert!(!layout.bundle_partial_path().exists());
    assert!(!layout.manifest_path().exists());
    assert!(!layout.lock_path().exists());
    let staging = listing(layout.root())?
        .into_iter()
        .filter(|name| name.starts_with(".staging-"))
        .collect::<Vec<_>>();
    assert_eq!(staging, Vec::<String>::new());
    assert_eq!(installer.assess().phase, Phase::Fresh);

    Ok(())
}

#[tokio::test]
async fn failure_after_extraction_keeps_payload() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let installer = fixture.installer(fixture.transport(), FakeUnpacker::without_executable());
    let layout = installer.layout().clone();

    let result = installer.install(None).await;
    assert!(matches!(
        result,
        Err(InstallerError::MissingExecutable { path }) if path == layout.executable_path()
    ));
    assert!(layout.payload_dir().join("README").is_file());
    assert!(!layout.bundle_path().exists());
    assert_eq!(installer.assess().phase, Phase::Partial);

    Ok(())
}

#[tokio::test]
async fn missing_executable_is_fetched_from_its_url() -> Result<()> {
    let mut fixture = InstallFixture::new()?;
    let url = "https://blah.org/release/station";
    fixture.profile.payload.executable_url = Some(url.into());
    let transport = fixture.transport().serve(url, b"#!/bin/sh\necho station\n".to_vec());
    let installer = fixture.installer(transport, FakeUnpacker::without_executable());

    let outcome = installer.install(None).await?;
    assert!(matches!(outcome, InstallOutcome::Installed(_)));

    let executable = installer.layout().executable_path();
    assert_eq!(read(&executable)?, b"#!/bin/sh\necho station\n");
    assert!(is_executable(&executable));
    assert_eq!(
        installer.engine().transport().requests().last().map(String::as_str),
        Some(url)
    );

    Ok(())
}

#[tokio::test]
async fn held_lock_refuses_to_install() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let installer = fixture.installer(fixture.transport(), FakeUnpacker::default());
    let lock = installer.layout().lock_path();

    create_dir_all(fixture.root())?;
    write(&lock, format!("{}\n", std::process::id()))?;

    let result = installer.install(None).await;
    assert!(matches!(
        result,
        Err(InstallerError::Lock(LockError::AlreadyRunning { pid, .. })) if pid == std::process::id()
    ));
    assert!(lock.exists());
    assert!(installer.engine().transport().requests().is_empty());

    Ok(())
}

#[tokio::test]
async fn changed_part_is_downloaded_again_on_resume() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let installer = fixture.installer(fixture.transport(), FakeUnpacker::default());
    let layout = installer.layout().clone();

    create_dir_all(layout.root())?;
    let mut manifest = InstallManifest::default();
    for ((name, body), path) in fixture.part_contents().into_iter().zip(layout.part_paths()) {
        write(&path, &body)?;
        manifest.parts.insert(name, PartRecord::of(&path)?);
    }

    // INVARIANT: Same size, different bytes.
    let second = layout.part_paths()[1].clone();
    let mut tampered = read(&second)?;
    tampered[0] ^= 0xff;
    write(&second, &tampered)?;
    ManifestFile::new(layout.manifest_path()).save(&manifest)?;

    let outcome = installer.install(Some(Decision::Resume)).await?;
    assert!(matches!(outcome, InstallOutcome::Installed(_)));

    let expect = vec![fixture.profile.release.url_of(&layout.part_names()[1])];
    assert_eq!(installer.engine().transport().requests(), expect);
    assert_eq!(read(layout.executable_path())?, fixture.bundle_contents());

    Ok(())
}

#[tokio::test]
async fn cut_short_part_is_resumed_not_combined() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let installer = fixture.installer(fixture.transport(), FakeUnpacker::default());
    let layout = installer.layout().clone();
    let parts = fixture.part_contents();
    let paths = layout.part_paths();

    create_dir_all(layout.root())?;
    let mut manifest = InstallManifest::default();
    write(&paths[0], &parts[0].1)?;
    manifest.parts.insert(parts[0].0.clone(), PartRecord::of(&paths[0])?);
    ManifestFile::new(layout.manifest_path()).save(&manifest)?;

    // INVARIANT: Above the size threshold, but never recorded as finished.
    write(&paths[1], &parts[1].1[..20])?;

    let outcome = installer.install(Some(Decision::Resume)).await?;
    assert!(matches!(outcome, InstallOutcome::Installed(_)));

    let expect = vec![
        fixture.profile.release.url_of(&parts[1].0),
        fixture.profile.release.url_of(&parts[2].0),
    ];
    assert_eq!(installer.engine().transport().requests(), expect);
    assert_eq!(read(layout.executable_path())?, fixture.bundle_contents());

    Ok(())
}

#[tokio::test]
async fn stale_staging_is_swept_on_fresh_install() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let installer = fixture.installer(fixture.transport(), FakeUnpacker::default());
    let layout = installer.layout().clone();

    let stale_staging = layout.root().join(".staging-crashed");
    create_dir_all(stale_staging.join("outer"))?;
    write(stale_staging.join("outer").join("huge.bin"), b"leftover")?;
    assert_eq!(installer.assess().phase, Phase::Fresh);

    let outcome = installer.install(None).await?;
    assert!(matches!(outcome, InstallOutcome::Installed(_)));
    assert!(!stale_staging.exists());

    Ok(())
}

#[tokio::test]
async fn clean_purge_removes_installation_and_autostart_entry() -> Result<()> {
    let fixture = InstallFixture::new()?;
    let installer = fixture.installer(fixture.transport(), FakeUnpacker::default());
    installer.install(None).await?;

    let script_path = fixture.scratch.path().join("system").join("custom.sh");
    let mut script = b"/usr/bin/other-service &\n".to_vec();
    script.extend(read(&script_path)?);
    write(&script_path, &script)?;

    installer.clean(false)?;
    assert!(is_executable(installer.layout().executable_path()));

    installer.clean(true)?;
    assert!(!installer.layout().payload_dir().exists());
    assert_eq!(installer.assess().phase, Phase::Fresh);
    assert_eq!(
        String::from_utf8(read(&script_path)?)?,
        "/usr/bin/other-service &\n"
    );

    Ok(())
}
