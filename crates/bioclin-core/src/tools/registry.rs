//! Static table of every tool: forwarded API calls plus the local
//! session-management tools.

use serde::Serialize;

use crate::api::HttpMethod;

/// Where non-path arguments of a forwarded call are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgTarget {
    Query,
    Json,
    Form,
}

/// Tools handled in-process instead of forwarded verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalTool {
    Login,
    Logout,
    CheckSession,
    BrowserLogin,
    RefreshToken,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Route {
    pub method: HttpMethod,
    /// Path relative to the base URL; `{field}` segments are filled from arguments.
    pub path: &'static str,
    pub target: ArgTarget,
    /// Sent without the session (password recovery flows).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub public: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Forward(Route),
    Local(LocalTool),
}

/// Value sent for an optional field the caller left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldDefault {
    Int(i64),
    Bool(bool),
}

impl FieldDefault {
    pub fn to_value(self) -> serde_json::Value {
        match self {
            FieldDefault::Int(n) => n.into(),
            FieldDefault::Bool(b) => b.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Field {
    pub name: &'static str,
    /// Name sent to the API when it differs from the argument name.
    #[serde(skip)]
    pub wire_name: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<FieldDefault>,
}

impl Field {
    const fn required(name: &'static str) -> Self {
        Self {
            name,
            wire_name: name,
            required: true,
            default: None,
        }
    }

    const fn optional(name: &'static str) -> Self {
        Self {
            name,
            wire_name: name,
            required: false,
            default: None,
        }
    }

    const fn sent_as(self, wire_name: &'static str) -> Self {
        Self { wire_name, ..self }
    }

    const fn or(self, default: FieldDefault) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ToolKind,
    pub fields: &'static [Field],
}

impl ToolSpec {
    const fn forward(
        name: &'static str,
        description: &'static str,
        method: HttpMethod,
        path: &'static str,
        target: ArgTarget,
        fields: &'static [Field],
    ) -> Self {
        Self {
            name,
            description,
            kind: ToolKind::Forward(Route {
                method,
                path,
                target,
                public: false,
            }),
            fields,
        }
    }

    const fn public(self) -> Self {
        match self.kind {
            ToolKind::Forward(route) => Self {
                kind: ToolKind::Forward(Route { public: true, ..route }),
                ..self
            },
            ToolKind::Local(_) => self,
        }
    }

    const fn local(name: &'static str, description: &'static str, tool: LocalTool, fields: &'static [Field]) -> Self {
        Self {
            name,
            description,
            kind: ToolKind::Local(tool),
            fields,
        }
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }
}

use ArgTarget::{Form, Json, Query};
use HttpMethod::{Delete, Get, Patch, Post, Put};

const NONE: &[Field] = &[];
const PAGING: &[Field] = &[Field::optional("skip"), Field::optional("limit")];
const SKIP: Field = Field::optional("skip").or(FieldDefault::Int(0));
const LIMIT: Field = Field::optional("limit").or(FieldDefault::Int(100));

pub const TOOLS: &[ToolSpec] = &[
    // Session
    ToolSpec::local(
        "bioclin_login",
        "Log in with username and password (or BIOCLIN_EMAIL/BIOCLIN_PASSWORD) and store the session",
        LocalTool::Login,
        &[Field::optional("username"), Field::optional("password")],
    ),
    ToolSpec::local(
        "bioclin_logout",
        "Log out remotely and delete the stored session",
        LocalTool::Logout,
        NONE,
    ),
    ToolSpec::local(
        "bioclin_check_session",
        "Report whether a valid session is stored, for whom, and until when",
        LocalTool::CheckSession,
        NONE,
    ),
    ToolSpec::local(
        "bioclin_browser_login",
        "Log in through a browser window and store the captured session",
        LocalTool::BrowserLogin,
        NONE,
    ),
    ToolSpec::local(
        "bioclin_refresh_token",
        "Exchange the refresh token for a new access token",
        LocalTool::RefreshToken,
        NONE,
    ),
    ToolSpec::forward(
        "bioclin_validate_token",
        "Validate the current access token",
        Post,
        "/identity/validate_token",
        Json,
        NONE,
    ),
    // Users
    ToolSpec::forward(
        "bioclin_create_user",
        "Create a user",
        Post,
        "/identity/create_user",
        Json,
        &[
            Field::required("email"),
            Field::required("password"),
            Field::required("username"),
            Field::optional("first_name"),
            Field::optional("last_name"),
            Field::optional("is_active").or(FieldDefault::Bool(true)),
        ],
    ),
    ToolSpec::forward(
        "bioclin_create_admin",
        "Create an admin user",
        Post,
        "/identity/create_admin",
        Json,
        &[
            Field::required("email"),
            Field::required("password"),
            Field::required("username"),
            Field::optional("first_name"),
            Field::optional("last_name"),
        ],
    ),
    ToolSpec::forward("bioclin_get_users", "List all users (admin only)", Get, "/identity/users/", Query, PAGING),
    ToolSpec::forward("bioclin_get_user_me", "Get the current user", Get, "/identity/user_me", Query, NONE),
    ToolSpec::forward(
        "bioclin_get_user_context",
        "Get the current user's organizations and roles",
        Get,
        "/identity/user_context",
        Query,
        &[
            Field::optional("orgs_skip").or(FieldDefault::Int(0)),
            Field::optional("orgs_limit").or(FieldDefault::Int(100)),
        ],
    ),
    ToolSpec::forward(
        "bioclin_update_user_me",
        "Update the current user's profile",
        Put,
        "/identity/user_me",
        Json,
        &[
            Field::optional("first_name"),
            Field::optional("last_name"),
            Field::optional("email"),
        ],
    ),
    ToolSpec::forward(
        "bioclin_set_user_admin",
        "Grant or revoke admin (admin only)",
        Put,
        "/identity/set_user_admin/{user_id}",
        Json,
        &[Field::required("user_id"), Field::required("is_admin")],
    ),
    ToolSpec::forward(
        "bioclin_set_user_active",
        "Activate or deactivate a user (admin only)",
        Put,
        "/identity/set_user_active/{user_id}",
        Json,
        &[Field::required("user_id"), Field::required("is_active")],
    ),
    ToolSpec::forward(
        "bioclin_recover_password",
        "Start password recovery for an email address",
        Post,
        "/identity/recover",
        Form,
        &[Field::required("email")],
    )
    .public(),
    ToolSpec::forward(
        "bioclin_reset_password",
        "Reset a password with a recovery token",
        Post,
        "/identity/reset",
        Form,
        &[Field::required("token"), Field::required("password")],
    )
    .public(),
    ToolSpec::forward(
        "bioclin_delete_user",
        "Delete a user (admin only)",
        Delete,
        "/identity/users/{user_id}",
        Query,
        &[Field::required("user_id")],
    ),
    // Organizations
    ToolSpec::forward(
        "bioclin_create_org",
        "Create an organization",
        Post,
        "/identity/create_org",
        Json,
        &[Field::required("name"), Field::optional("description")],
    ),
    ToolSpec::forward("bioclin_get_orgs", "List all organizations", Get, "/identity/orgs/", Query, PAGING),
    ToolSpec::forward(
        "bioclin_get_org",
        "Get an organization",
        Get,
        "/identity/orgs/{org_id}",
        Query,
        &[Field::required("org_id")],
    ),
    ToolSpec::forward(
        "bioclin_get_user_orgs",
        "List the current user's organizations",
        Get,
        "/identity/users/me/orgs",
        Query,
        PAGING,
    ),
    ToolSpec::forward(
        "bioclin_update_active_org",
        "Switch the current user's active organization",
        Patch,
        "/identity/users/update_active_org",
        Query,
        &[Field::required("org_id")],
    ),
    ToolSpec::forward(
        "bioclin_add_user_to_org",
        "Add a user to an organization with a role",
        Post,
        "/identity/add_user_to_org",
        Json,
        &[
            Field::required("user_id"),
            Field::required("org_id").sent_as("organization_id"),
            Field::required("role_id"),
        ],
    ),
    // Permissions
    ToolSpec::forward("bioclin_get_roles", "List roles", Get, "/identity/roles/", Query, NONE),
    ToolSpec::forward("bioclin_get_permissions", "List permissions", Get, "/identity/permissions/", Query, NONE),
    // Parameters
    ToolSpec::forward(
        "bioclin_create_param",
        "Create an analysis parameter",
        Post,
        "/project/create_param",
        Json,
        &[
            Field::required("name"),
            Field::required("param_type").sent_as("type"),
            Field::optional("description"),
            Field::optional("default_value"),
        ],
    ),
    ToolSpec::forward("bioclin_get_params", "List parameters", Get, "/project/params/", Query, PAGING),
    ToolSpec::forward(
        "bioclin_update_param",
        "Update a parameter",
        Put,
        "/project/params/{param_id}",
        Json,
        &[
            Field::required("param_id"),
            Field::optional("name"),
            Field::optional("param_type").sent_as("type"),
            Field::optional("description"),
            Field::optional("default_value"),
        ],
    ),
    ToolSpec::forward(
        "bioclin_delete_param",
        "Delete a parameter",
        Delete,
        "/project/params/{param_id}",
        Query,
        &[Field::required("param_id")],
    ),
    // Analysis types
    ToolSpec::forward(
        "bioclin_create_analysis_type",
        "Create an analysis type",
        Post,
        "/project/create_analysis_type",
        Json,
        &[Field::required("name"), Field::optional("description")],
    ),
    ToolSpec::forward(
        "bioclin_get_analysis_types",
        "List analysis types",
        Get,
        "/project/analysis_types/",
        Query,
        PAGING,
    ),
    ToolSpec::forward(
        "bioclin_update_analysis_type",
        "Update an analysis type",
        Put,
        "/project/analysis_types/{analysis_type_id}",
        Json,
        &[
            Field::required("analysis_type_id"),
            Field::optional("name"),
            Field::optional("description"),
        ],
    ),
    ToolSpec::forward(
        "bioclin_delete_analysis_type",
        "Delete an analysis type",
        Delete,
        "/project/analysis_types/{analysis_type_id}",
        Query,
        &[Field::required("analysis_type_id")],
    ),
    // Projects
    ToolSpec::forward(
        "bioclin_create_project",
        "Create a project",
        Post,
        "/project/create_project",
        Json,
        &[
            Field::required("name"),
            Field::required("analysis_type_id"),
            Field::optional("description"),
            Field::optional("organization_id"),
        ],
    ),
    ToolSpec::forward("bioclin_get_projects", "List all projects", Get, "/project/projects/", Query, PAGING),
    ToolSpec::forward(
        "bioclin_get_user_projects",
        "List the current user's projects",
        Get,
        "/project/user_projects/",
        Query,
        PAGING,
    ),
    ToolSpec::forward(
        "bioclin_get_project",
        "Get a project",
        Get,
        "/project/projects/{project_id}",
        Query,
        &[Field::required("project_id")],
    ),
    ToolSpec::forward(
        "bioclin_delete_project",
        "Delete a project",
        Delete,
        "/project/projects/{project_id}",
        Query,
        &[Field::required("project_id")],
    ),
    // Runs
    ToolSpec::forward(
        "bioclin_create_run",
        "Create an analysis run",
        Post,
        "/project/create_run",
        Json,
        &[
            Field::required("name"),
            Field::required("project_id"),
            Field::optional("description"),
            Field::optional("parameters"),
        ],
    ),
    ToolSpec::forward("bioclin_get_runs", "List all runs (admin only)", Get, "/project/runs/", Query, PAGING),
    ToolSpec::forward(
        "bioclin_get_runs_by_project",
        "List runs of a project",
        Get,
        "/project/runs_by_project",
        Query,
        &[Field::required("project_id"), SKIP, LIMIT],
    ),
    ToolSpec::forward(
        "bioclin_get_runs_by_org",
        "List runs of an organization",
        Get,
        "/project/runs_by_org",
        Query,
        &[Field::required("org_id"), SKIP, LIMIT],
    ),
    ToolSpec::forward(
        "bioclin_delete_run",
        "Delete a run",
        Delete,
        "/project/runs/{run_id}",
        Query,
        &[Field::required("run_id")],
    ),
    // Cloud storage
    ToolSpec::forward(
        "bioclin_generate_signed_url",
        "Generate a signed URL for a file in cloud storage",
        Post,
        "/google-ops/generate_signed_url",
        Json,
        &[
            Field::required("bucket_name"),
            Field::required("blob_name"),
            Field::optional("expiration_minutes").or(FieldDefault::Int(60)),
        ],
    ),
    ToolSpec::forward(
        "bioclin_get_html_report",
        "Fetch an HTML report from cloud storage",
        Get,
        "/google-ops/get_html_report",
        Query,
        &[Field::required("bucket_name"), Field::required("blob_name")],
    ),
    ToolSpec::forward(
        "bioclin_download_file",
        "Download a file from cloud storage",
        Get,
        "/google-ops/download",
        Query,
        &[Field::required("bucket_name"), Field::required("blob_name")],
    ),
];

pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}
