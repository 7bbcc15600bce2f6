//! The scoped archive session of one app.

use std::cell::OnceCell;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use seq::Seq;
use versions::Version;

use content::{
    AppSettings, FileEntry, Html, JsonDoc, Lang, Layout, LayoutSet, LayoutSetMeta, LayoutSets,
    LayoutSettings, Process, Program, RuleConfiguration, RuleHandler, SourceFile, TextResource,
    XmlDoc,
};

use crate::app::{App, Descriptor};

lazy_static! {
    static ref FRONTEND_SRC_RE: Regex = Regex::new(
        r"^https://altinncdn\.no/toolkits/altinn-app-frontend/([a-zA-Z0-9\-.]+)/altinn-app-frontend\.js$"
    )
    .unwrap();
}

enum ArchiveSlot {
    Unopened(PathBuf),
    Open(zip::ZipArchive<BufReader<File>>),
    /// Opening failed; reads answer empty rather than erroring per app.
    Failed,
    /// The session exited; any further read is a programmer error.
    Closed,
}

type SharedSlot = Arc<Mutex<ArchiveSlot>>;

fn with_archive<R>(
    slot: &SharedSlot,
    key: &str,
    f: impl FnOnce(&mut zip::ZipArchive<BufReader<File>>) -> R,
) -> Option<R> {
    let mut guard = slot.lock().unwrap();
    if let ArchiveSlot::Unopened(path) = &*guard {
        let path = path.clone();
        let opened = File::open(&path)
            .map_err(anyhow::Error::from)
            .and_then(|file| {
                zip::ZipArchive::new(BufReader::new(file)).map_err(anyhow::Error::from)
            });
        *guard = match opened {
            Ok(archive) => ArchiveSlot::Open(archive),
            Err(error) => {
                tracing::warn!(key, %error, "failed to open archive; treating app as empty");
                ArchiveSlot::Failed
            }
        };
    }
    match &mut *guard {
        ArchiveSlot::Open(archive) => Some(f(archive)),
        ArchiveSlot::Closed => panic!(
            "content of app {key} was read outside its archive session; \
             consume lazy sequences before the session exits"
        ),
        _ => None,
    }
}

fn read_member(slot: &SharedSlot, key: &str, name: &str) -> Bytes {
    with_archive(slot, key, |archive| {
        let mut member = match archive.by_name(name) {
            Ok(member) => member,
            Err(error) => {
                tracing::warn!(key, name, %error, "archive member went missing");
                return Bytes::new();
            }
        };
        let mut buffer = Vec::with_capacity(member.size() as usize);
        if let Err(error) = member.read_to_end(&mut buffer) {
            tracing::warn!(key, name, %error, "failed to read archive member");
            return Bytes::new();
        }
        Bytes::from(buffer)
    })
    .unwrap_or_default()
}

/// An app's open archive session: lazy acquisition, guaranteed release,
/// and per-session caching of every derived fact.
pub struct Session<'a> {
    app: &'a App,
    open_flag: Arc<AtomicBool>,
    slot: SharedSlot,
    names: OnceCell<Arc<Vec<String>>>,

    application_metadata: OnceCell<JsonDoc>,
    layout_sets: OnceCell<LayoutSets>,
    index_cshtml: OnceCell<Html>,
    program: OnceCell<Program>,
    process: OnceCell<Process>,
    policy: OnceCell<XmlDoc>,
    csproj: OnceCell<Seq<XmlDoc>>,
    cs: OnceCell<Seq<SourceFile>>,
    text_resources: OnceCell<Seq<TextResource>>,
    app_settings: OnceCell<Seq<AppSettings>>,
    frontend_version: OnceCell<Version>,
    backend_versions: OnceCell<Seq<Version>>,
    dotnet_versions: OnceCell<Seq<String>>,
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        // Release in reverse order of acquisition: the zip index, then
        // (implicitly, by dropping it) the file handle.
        *self.slot.lock().unwrap() = ArchiveSlot::Closed;
        self.open_flag.store(false, Ordering::SeqCst);
    }
}

impl<'a> Session<'a> {
    pub(crate) fn new(app: &'a App, open_flag: Arc<AtomicBool>) -> Session<'a> {
        Session {
            app,
            open_flag,
            slot: Arc::new(Mutex::new(ArchiveSlot::Unopened(app.archive_path()))),
            names: OnceCell::new(),
            application_metadata: OnceCell::new(),
            layout_sets: OnceCell::new(),
            index_cshtml: OnceCell::new(),
            program: OnceCell::new(),
            process: OnceCell::new(),
            policy: OnceCell::new(),
            csproj: OnceCell::new(),
            cs: OnceCell::new(),
            text_resources: OnceCell::new(),
            app_settings: OnceCell::new(),
            frontend_version: OnceCell::new(),
            backend_versions: OnceCell::new(),
            dotnet_versions: OnceCell::new(),
        }
    }

    /// The descriptor this session belongs to.
    pub fn app(&self) -> &App {
        self.app
    }

    fn desc(&self) -> &Descriptor {
        &self.app.desc
    }

    /// The archive's member listing (opens the archive on first use).
    pub fn file_names(&self) -> Arc<Vec<String>> {
        Arc::clone(self.names.get_or_init(|| {
            let names = with_archive(&self.slot, &self.desc().key(), |archive| {
                archive.file_names().map(str::to_owned).collect::<Vec<_>>()
            })
            .unwrap_or_default();
            Arc::new(names)
        }))
    }

    pub fn file_exists(&self, pattern: &str) -> bool {
        let regex = compile_pattern(pattern);
        self.file_names().iter().any(|name| regex.is_match(name))
    }

    /// Members whose path matches `pattern`, as lazily-read entries with
    /// rendered permalinks. Entries must be consumed before the session
    /// exits.
    pub fn files_matching(&self, pattern: &str) -> Seq<FileEntry> {
        let regex = compile_pattern(pattern);
        let matching: Vec<String> = self
            .file_names()
            .iter()
            .filter(|name| regex.is_match(name))
            .cloned()
            .collect();
        let slot = Arc::clone(&self.slot);
        let desc = Arc::clone(&self.app.desc);
        Seq::from_iter(matching.into_iter().map(move |path| {
            let bytes = read_member(&slot, &desc.key(), &path);
            let remote_url = desc.remote_file_url(&path);
            FileEntry {
                bytes,
                path,
                remote_url,
            }
        }))
    }

    // ---- derived facts, cached for the session's lifetime ----

    pub fn application_metadata(&self) -> &JsonDoc {
        self.application_metadata.get_or_init(|| {
            self.files_matching(r"/App/config/applicationmetadata\.json$")
                .map(|entry| JsonDoc::from_entry(&entry))
                .first_or(JsonDoc::empty())
        })
    }

    /// The realized layout sets: the declared ones when
    /// `layout-sets.json` exists, otherwise one default set synthesized
    /// from the fixed `/App/ui/` layout locations.
    pub fn layout_sets(&self) -> &LayoutSets {
        self.layout_sets.get_or_init(|| {
            let base = self
                .files_matching(r"/App/ui/layout-sets\.json$")
                .map(|entry| LayoutSets::from_entry(&entry))
                .first_or(LayoutSets::empty());

            let declared: Vec<(Option<LayoutSetMeta>, String)> = if base.exists() {
                base.declared_sets()
                    .list()
                    .iter()
                    .filter_map(LayoutSetMeta::from_node)
                    .map(|meta| {
                        let path = format!("/App/ui/{}/", meta.id);
                        (Some(meta), path)
                    })
                    .collect()
            } else {
                vec![(None, "/App/ui/".to_owned())]
            };

            let mut sets = Vec::new();
            for (meta, base_path) in declared {
                let multi = format!("{base_path}layouts/[^/]+\\.json$");
                let single = format!("{base_path}FormLayout\\.json$");
                let layouts_path = if self.file_exists(&multi) {
                    multi
                } else if self.file_exists(&single) {
                    single
                } else {
                    // A set with no layout files contributes nothing.
                    continue;
                };

                let set_id = meta.as_ref().map(|meta| meta.id.clone());
                let layouts = {
                    let set_id = set_id.clone();
                    self.files_matching(&layouts_path)
                        .map(move |entry| Layout::from_entry(&entry, set_id.clone()))
                        .filter(Layout::exists)
                };
                let settings = {
                    let set_id = set_id.clone();
                    self.files_matching(&format!("{base_path}Settings\\.json$"))
                        .map(move |entry| LayoutSettings::from_entry(&entry, set_id.clone()))
                };
                let rule_configuration = {
                    let set_id = set_id.clone();
                    self.files_matching(&format!("{base_path}RuleConfiguration\\.json$"))
                        .map(move |entry| RuleConfiguration::from_entry(&entry, set_id.clone()))
                };
                let rule_handler = self
                    .files_matching(&format!("{base_path}RuleHandler\\.js$"))
                    .map(|entry| RuleHandler::from_entry(&entry));

                sets.push(LayoutSet::new(
                    meta,
                    layouts,
                    settings,
                    rule_configuration,
                    rule_handler,
                ));
            }
            base.with_sets(Seq::of(sets))
        })
    }

    pub fn layouts(&self) -> Seq<Layout> {
        self.layout_sets().sets().flat_map(|set| set.layouts())
    }

    pub fn components(&self) -> Seq<content::Component> {
        self.layouts().flat_map(|layout| layout.components())
    }

    pub fn layout_settings(&self) -> Seq<LayoutSettings> {
        self.layout_sets()
            .sets()
            .map(|set| set.settings())
            .filter(LayoutSettings::exists)
    }

    pub fn rule_configurations(&self) -> Seq<RuleConfiguration> {
        self.layout_sets()
            .sets()
            .map(|set| set.rule_configuration())
            .filter(RuleConfiguration::exists)
    }

    pub fn rule_handlers(&self) -> Seq<RuleHandler> {
        self.layout_sets()
            .sets()
            .map(|set| set.rule_handler())
            .filter(RuleHandler::exists)
    }

    pub fn text_resources(&self) -> Seq<TextResource> {
        self.text_resources
            .get_or_init(|| {
                self.files_matching(r"/App/config/texts/resource\.[a-z]{2}\.json$")
                    .map(|entry| TextResource::from_entry(&entry))
                    .filter(TextResource::exists)
            })
            .clone()
    }

    pub fn app_settings(&self) -> Seq<AppSettings> {
        self.app_settings
            .get_or_init(|| {
                self.files_matching(r"/App/appsettings(\.[^.]+)?\.json$")
                    .map(|entry| AppSettings::from_entry(&entry))
                    .filter(AppSettings::exists)
            })
            .clone()
    }

    /// Every C# source file of the app.
    pub fn cs(&self) -> Seq<SourceFile> {
        self.cs
            .get_or_init(|| {
                self.files_matching(r"\.cs$")
                    .map(|entry| SourceFile::from_entry(Lang::CSharp, &entry))
                    .filter(SourceFile::exists)
            })
            .clone()
    }

    pub fn program_cs(&self) -> &Program {
        self.program.get_or_init(|| {
            self.files_matching(r"/App/Program\.cs$")
                .map(|entry| Program::from_entry(&entry))
                .first_or(Program::empty())
        })
    }

    pub fn index_cshtml(&self) -> &Html {
        self.index_cshtml.get_or_init(|| {
            self.files_matching(r"/App/views/Home/Index\.cshtml$")
                .map(|entry| Html::from_entry(&entry))
                .first_or(Html::empty())
        })
    }

    pub fn process(&self) -> &Process {
        self.process.get_or_init(|| {
            self.files_matching(r"/App/config/process/process\.bpmn$")
                .map(|entry| Process::from_entry(&entry))
                .first_or(Process::empty())
        })
    }

    pub fn policy(&self) -> &XmlDoc {
        self.policy.get_or_init(|| {
            self.files_matching(r"/App/config/authorization/policy\.xml$")
                .map(|entry| XmlDoc::from_entry(&entry))
                .first_or(XmlDoc::empty())
        })
    }

    pub fn csproj(&self) -> Seq<XmlDoc> {
        self.csproj
            .get_or_init(|| {
                self.files_matching(r"\.csproj$")
                    .map(|entry| XmlDoc::from_entry(&entry))
                    .filter(XmlDoc::exists)
            })
            .clone()
    }

    /// The frontend toolkit version referenced by the home view.
    pub fn frontend_version(&self) -> &Version {
        self.frontend_version.get_or_init(|| {
            self.index_cshtml()
                .script_sources()
                .list()
                .iter()
                .find_map(|src| {
                    FRONTEND_SRC_RE
                        .captures(src)
                        .and_then(|captures| captures.get(1))
                        .map(|version| Version::parse(version.as_str()))
                })
                .unwrap_or_else(Version::empty)
        })
    }

    /// Versions of the Altinn app backend packages referenced by any
    /// csproj, descending and deduplicated.
    pub fn backend_versions(&self) -> Seq<Version> {
        self.backend_versions
            .get_or_init(|| {
                self.csproj()
                    .flat_map(|csproj| {
                        csproj
                            .query(
                                r#".//PackageReference[matches(@Include, "^Altinn\.App\.(Core|Api|Common)(\.Experimental)?$", "i")]/@Version"#,
                            )
                            .list()
                            .into_iter()
                            .filter_map(|node| node.text())
                            .map(Version::parse)
                            .collect::<Vec<_>>()
                    })
                    .filter(Version::exists)
                    .sort_by_key(Version::clone, true)
                    .unique_by(Version::raw_key)
            })
            .clone()
    }

    pub fn backend_version(&self) -> Version {
        self.backend_versions().first_or(Version::empty())
    }

    /// `TargetFramework` values of every csproj, descending, deduped.
    pub fn dotnet_versions(&self) -> Seq<String> {
        self.dotnet_versions
            .get_or_init(|| {
                self.csproj()
                    .flat_map(|csproj| {
                        csproj
                            .query(".//TargetFramework/text()")
                            .list()
                            .into_iter()
                            .filter_map(|node| node.text())
                            .collect::<Vec<_>>()
                    })
                    .filter(|framework| !framework.is_empty())
                    .sort_by_key(String::clone, true)
                    .unique_by(String::clone)
            })
            .clone()
    }

    pub fn dotnet_version(&self) -> Option<String> {
        self.dotnet_versions().first()
    }
}

/// File-selection patterns come from code, not data; a malformed one is
/// a programmer error.
fn compile_pattern(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|err| panic!("invalid file pattern {pattern:?}: {err}"))
}
