mod cli;
mod output;

use clap::Parser;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::io::{self, ErrorKind};

use typecat_core::index::{EnumValueRow, MemberRow, ParameterRow, TypeRow};
use typecat_core::{
    Catalog, CatalogConfig, CatalogError, CatalogOptions, MemberQuery, Query, TypeQuery,
    typecat_home,
};

use crate::cli::{Cli, Command};
use crate::output::OutputHandler;

/// Upper bound when resolving a type name for `show`.
const SHOW_LIMIT: u32 = 1000;

/// A type with everything `show` prints about it.
#[derive(Serialize)]
struct TypeDetail {
    #[serde(flatten)]
    ty: TypeRow,
    interfaces: Vec<String>,
    enum_values: Vec<EnumValueRow>,
    members: Vec<MemberDetail>,
}

#[derive(Serialize)]
struct MemberDetail {
    #[serde(flatten)]
    member: MemberRow,
    parameters: Vec<ParameterRow>,
}

impl fmt::Display for TypeDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty)?;
        if !self.interfaces.is_empty() {
            write!(f, "\n  implements {}", self.interfaces.join(", "))?;
        }
        for value in &self.enum_values {
            write!(f, "\n  {value}")?;
        }
        for detail in &self.members {
            let m = &detail.member;
            write!(f, "\n  {} {}", m.kind.to_lowercase(), m.name)?;
            if matches!(m.kind.as_str(), "Constructor" | "Method") {
                let params: Vec<String> = detail.parameters.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", params.join(", "))?;
            }
            if let Some(ret) = &m.return_type {
                write!(f, " : {ret}")?;
            }
        }
        Ok(())
    }
}

fn to_io(e: CatalogError) -> io::Error {
    let kind = match &e {
        CatalogError::NotFound { .. } | CatalogError::UnknownModule(_) => ErrorKind::NotFound,
        CatalogError::Busy { .. } => ErrorKind::WouldBlock,
        CatalogError::Config(_) => ErrorKind::InvalidInput,
        CatalogError::Load { .. } => ErrorKind::InvalidData,
        _ => ErrorKind::Other,
    };
    io::Error::new(kind, e.to_string())
}

fn open_catalog(cli: &Cli) -> Result<Catalog, CatalogError> {
    let config = match &cli.config {
        Some(path) => CatalogConfig::load(path)?,
        None => CatalogConfig::load_default()?,
    };
    let path = match &cli.db {
        Some(path) => path.clone(),
        None => config.database_path(&typecat_home()?),
    };
    Catalog::open(&path, config)
}

/// Types whose full name or simple name is exactly `name`.
fn find_types(query: &Query<'_>, name: &str) -> Result<Vec<TypeRow>, CatalogError> {
    let rows = query.search_types(&TypeQuery {
        pattern: Some(name.to_string()),
        limit: SHOW_LIMIT,
        ..Default::default()
    })?;
    Ok(rows
        .into_iter()
        .filter(|row| row.full_name == name || row.name == name)
        .collect())
}

fn type_detail(query: &Query<'_>, ty: TypeRow) -> Result<TypeDetail, CatalogError> {
    let interfaces = query
        .interfaces_of(&ty.full_name)?
        .into_iter()
        .map(|row| row.full_name)
        .collect();
    let enum_values = query.enum_values(&ty.full_name)?;
    let members = query
        .type_members(&ty.full_name)?
        .into_iter()
        .filter(|member| member.module == ty.module)
        .map(|member| {
            let parameters = query.member_parameters(member.id)?;
            Ok(MemberDetail { member, parameters })
        })
        .collect::<Result<Vec<_>, CatalogError>>()?;
    Ok(TypeDetail {
        ty,
        interfaces,
        enum_values,
        members,
    })
}

fn not_found(what: &str, name: &str) -> io::Error {
    io::Error::new(
        ErrorKind::NotFound,
        format!("no cataloged {what} matches '{name}'"),
    )
}

fn execute(command: Command, catalog: &mut Catalog, output: &OutputHandler) -> io::Result<()> {
    match command {
        Command::Catalog {
            paths,
            force,
            group,
        } => {
            let options = CatalogOptions { force, group };
            let mut summaries = Vec::new();
            let mut failures = 0;
            for path in &paths {
                match catalog.catalog(path, &options) {
                    Ok(summary) => {
                        for gap in &summary.resolution_gaps {
                            log::info!("unresolved: {gap}");
                        }
                        summaries.push(summary);
                    }
                    Err(e) => {
                        output.diagnostic(&format!("[error] {e}"));
                        failures += 1;
                    }
                }
            }
            if !summaries.is_empty() {
                output.emit_rows(&summaries)?;
            }
            if failures > 0 {
                return Err(io::Error::other(format!(
                    "{failures} of {} module(s) failed to catalog",
                    paths.len()
                )));
            }
            Ok(())
        }
        Command::Types {
            pattern,
            kind,
            namespace,
            module,
            limit,
        } => {
            let rows = catalog
                .query()
                .search_types(&TypeQuery {
                    pattern,
                    kind,
                    namespace,
                    module,
                    limit,
                })
                .map_err(to_io)?;
            output.emit_rows(&rows)
        }
        Command::Members {
            pattern,
            kind,
            declaring_type,
            limit,
        } => {
            let rows = catalog
                .query()
                .search_members(&MemberQuery {
                    pattern,
                    kind,
                    declaring_type,
                    limit,
                })
                .map_err(to_io)?;
            output.emit_rows(&rows)
        }
        Command::Namespace { name, module } => {
            let rows = catalog
                .query()
                .namespace_types(&name, module.as_deref())
                .map_err(to_io)?;
            output.emit_rows(&rows)
        }
        Command::Namespaces { module } => {
            let rows = catalog
                .query()
                .list_namespaces(module.as_deref())
                .map_err(to_io)?;
            output.emit_rows(&rows)
        }
        Command::Show { type_name } => {
            let query = catalog.query();
            let types = find_types(&query, &type_name).map_err(to_io)?;
            if types.is_empty() {
                return Err(not_found("type", &type_name));
            }
            let details = types
                .into_iter()
                .map(|ty| type_detail(&query, ty))
                .collect::<Result<Vec<_>, _>>()
                .map_err(to_io)?;
            output.emit_rows(&details)
        }
        Command::Inherits { type_name } => {
            let chain = catalog
                .query()
                .inheritance_chain(&type_name)
                .map_err(to_io)?;
            if chain.is_empty() {
                return Err(not_found("type", &type_name));
            }
            output.emit_rows(&chain)
        }
        Command::Implementors { interface } => {
            let rows = catalog
                .query()
                .implementations(&interface)
                .map_err(to_io)?;
            output.emit_rows(&rows)
        }
        Command::Derived { type_name } => {
            let rows = catalog
                .query()
                .derived_types(&type_name)
                .map_err(to_io)?;
            output.emit_rows(&rows)
        }
        Command::Docs { text, limit } => {
            let rows = catalog
                .query()
                .search_docs(&text.join(" "), limit)
                .map_err(to_io)?;
            output.emit_rows(&rows)
        }
        Command::Modules { group } => {
            let rows = catalog
                .query()
                .list_modules(group.as_deref())
                .map_err(to_io)?;
            output.emit_rows(&rows)
        }
        Command::Groups => {
            let rows = catalog.query().list_products().map_err(to_io)?;
            output.emit_rows(&rows)
        }
        Command::Remove { module } => {
            let removed = catalog.remove(&module).map_err(to_io)?;
            output.emit_value(
                &json!({ "module": module, "removed": removed }),
                &format!("removed {removed} module(s) matching '{module}'"),
            )
        }
        Command::Status => {
            let status = catalog.status().map_err(to_io)?;
            output.emit_value(
                &json!({ "database": catalog.path(), "status": status }),
                &status,
            )
        }
    }
}

fn main() -> io::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();

    let output = OutputHandler::new(cli.json);
    let mut catalog = open_catalog(&cli).map_err(to_io)?;
    log::debug!("using catalog {}", catalog.path().display());

    execute(cli.command, &mut catalog, &output)
}
