/// Page and editor handlers. All of them run behind `require_session`.
use super::editor::Editor;
use crate::auth::{SessionClaims, absolute_url, found};
use crate::context::Ctx;
use crate::error::{AppError, DASHBOARD_PATH};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use garden_store::{
    NewPage, Page, PageContent, PageId, PagePatch, PageStore, SaveStatus, SessionContext,
    StoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct PageView {
    #[serde(flatten)]
    pub page: Page,
    pub display_title: String,
}

impl From<Page> for PageView {
    fn from(page: Page) -> Self {
        Self {
            display_title: page.display_title().to_string(),
            page,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub user: UserView,
    pub pages: Vec<PageView>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePageRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: Option<PageContent>,
    #[serde(default)]
    pub parent_id: Option<PageId>,
}

impl CreatePageRequest {
    pub fn into_new_page(self) -> Result<NewPage, AppError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(AppError::BadRequest("Title is required".to_string()));
        }
        Ok(NewPage {
            title: title.to_string(),
            content: Some(self.content.unwrap_or_else(PageContent::empty_blocks)),
            parent_id: self.parent_id,
        })
    }
}

fn parse_id(raw: &str) -> Result<PageId, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid page id: {}", raw)))
}

// ============================================================================
// Pages
// ============================================================================

/// `GET /dashboard`
pub async fn dashboard(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<Json<DashboardView>, AppError> {
    let pages = ctx.pages.list(&scope).await?;

    Ok(Json(DashboardView {
        user: UserView {
            id: claims.user_id,
            email: claims.email,
            name: claims.name,
            avatar_url: claims.avatar_url,
        },
        pages: pages.into_iter().map(PageView::from).collect(),
    }))
}

/// `GET /page/{id}`: the page, or back to the dashboard when it does not exist.
pub async fn page_view(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    let dashboard = absolute_url(&ctx.config.app_url, DASHBOARD_PATH);
    let Ok(id) = parse_id(&raw_id) else {
        return Ok(found(&dashboard));
    };

    match ctx.pages.get(&scope, id).await {
        Ok(page) => Ok(Json(PageView::from(page)).into_response()),
        Err(StoreError::NotFound(_)) => Ok(found(&dashboard)),
        Err(e) => Err(e.into()),
    }
}

/// `GET /api/pages`
pub async fn list_pages(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
) -> Result<Json<Vec<PageView>>, AppError> {
    let pages = ctx.pages.list(&scope).await?;
    Ok(Json(pages.into_iter().map(PageView::from).collect()))
}

/// `POST /api/pages`
pub async fn create_page(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Json(request): Json<CreatePageRequest>,
) -> Result<(StatusCode, Json<PageView>), AppError> {
    let page = match ctx.pages.create(&scope, request.into_new_page()?).await {
        Ok(page) => page,
        Err(StoreError::NotFound(parent)) => {
            return Err(AppError::BadRequest(format!("Parent page not found: {}", parent)));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(page_id = %page.id, "page created");
    Ok((StatusCode::CREATED, Json(page.into())))
}

/// `GET /api/pages/{id}`
pub async fn get_page(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Path(raw_id): Path<String>,
) -> Result<Json<PageView>, AppError> {
    let page = ctx.pages.get(&scope, parse_id(&raw_id)?).await?;
    Ok(Json(page.into()))
}

/// `PATCH /api/pages/{id}`
pub async fn update_page(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Path(raw_id): Path<String>,
    Json(patch): Json<PagePatch>,
) -> Result<Json<PageView>, AppError> {
    let page = ctx.pages.update(&scope, parse_id(&raw_id)?, patch).await?;
    Ok(Json(page.into()))
}

/// `DELETE /api/pages/{id}`
pub async fn delete_page(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&raw_id)?;
    ctx.pages.delete(&scope, id).await?;
    ctx.editors.unmount(&scope, id);
    tracing::info!(page_id = %id, "page deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Editor sessions
// ============================================================================

fn page_gone(id: PageId) -> AppError {
    AppError::PageGone(format!("page {} not found", id))
}

async fn mount(ctx: &Ctx, scope: &SessionContext, id: PageId) -> Result<Arc<Editor>, AppError> {
    match ctx.editors.mount(ctx.pages.clone(), scope, id).await {
        Ok(editor) => Ok(editor),
        Err(StoreError::NotFound(_)) => Err(page_gone(id)),
        Err(e) => Err(e.into()),
    }
}

/// `POST /api/pages/{id}/editor`
pub async fn mount_editor(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Path(raw_id): Path<String>,
) -> Result<Json<SaveStatus>, AppError> {
    let editor = mount(&ctx, &scope, parse_id(&raw_id)?).await?;
    Ok(Json(editor.status()))
}

/// `PATCH /api/pages/{id}/editor`: local edits, saved after the quiet interval.
pub async fn edit_in_editor(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Path(raw_id): Path<String>,
    Json(edit): Json<PagePatch>,
) -> Result<(StatusCode, Json<SaveStatus>), AppError> {
    let id = parse_id(&raw_id)?;
    if edit.is_empty() {
        return Err(AppError::BadRequest("Nothing to edit".to_string()));
    }

    let editor = mount(&ctx, &scope, id).await?;
    if editor.is_gone() {
        ctx.editors.unmount(&scope, id);
        return Err(page_gone(id));
    }

    if let Some(title) = edit.title {
        editor.on_title_change(title);
    }
    if let Some(content) = edit.content {
        editor.on_content_change(content);
    }

    Ok((StatusCode::ACCEPTED, Json(editor.status())))
}

/// `GET /api/pages/{id}/editor`
pub async fn editor_status(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Path(raw_id): Path<String>,
) -> Result<Json<SaveStatus>, AppError> {
    let id = parse_id(&raw_id)?;
    let editor = ctx
        .editors
        .get(&scope, id)
        .ok_or_else(|| AppError::NotFound(format!("no editor mounted for page {}", id)))?;

    let status = editor.status();
    if status.gone {
        ctx.editors.unmount(&scope, id);
        return Err(page_gone(id));
    }
    Ok(Json(status))
}

/// `DELETE /api/pages/{id}/editor`
pub async fn unmount_editor(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&raw_id)?;
    if ctx.editors.unmount(&scope, id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("no editor mounted for page {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_title_is_rejected() {
        let request: CreatePageRequest = serde_json::from_value(json!({ "title": "   " })).unwrap();
        assert!(matches!(request.into_new_page(), Err(AppError::BadRequest(_))));

        let missing: CreatePageRequest = serde_json::from_value(json!({})).unwrap();
        assert!(missing.into_new_page().is_err());
    }

    #[test]
    fn test_create_defaults_content_to_empty_blocks() {
        let request: CreatePageRequest =
            serde_json::from_value(json!({ "title": " Garden plan " })).unwrap();
        let page = request.into_new_page().unwrap();

        assert_eq!(page.title, "Garden plan");
        assert_eq!(page.content, Some(PageContent::empty_blocks()));
        assert_eq!(page.parent_id, None);
    }

    #[test]
    fn test_page_view_carries_display_title() {
        let now = chrono::Utc::now();
        let page = Page {
            id: PageId::new_random(),
            title: String::new(),
            content: None,
            parent_id: None,
            owner_id: garden_store::OwnerId::new("sub-1"),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(PageView::from(page)).unwrap();
        assert_eq!(json["display_title"], "Untitled");
        assert_eq!(json["title"], "");
    }
}
